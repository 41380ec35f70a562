mod common;

use common::{asm, toy16_with};
use defasm::isa::{DirectiveAction, DirectiveDef, ScriptMode};
use defasm::sandbox::SandboxError;
use defasm::{assemble, AsmError, IsaError, IsaModel};
use pretty_assertions::assert_eq;

fn with_directive(name: &str, script: &str, size: Option<u64>) -> Result<IsaModel, IsaError> {
    toy16_with(|def| {
        def.directives.push(DirectiveDef {
            name: name.into(),
            argument_types: Vec::new(),
            action: DirectiveAction::Custom,
            semantics_script: Some(script.into()),
            size,
        })
    })
}

#[test]
fn unbound_operations_are_rejected_when_the_model_is_built() {
    let err = with_directive(".evil", "open(\"/etc/passwd\");", None).unwrap_err();
    assert!(
        matches!(&err, IsaError::Script { owner, source: SandboxError::Violation(_) } if owner == ".evil"),
        "{err:?}"
    );
    assert!(with_directive(".evil", "x = 1;", None).is_err());
}

#[test]
fn instruction_scripts_may_not_move_the_cursor() {
    let err = toy16_with(|def| {
        let ldi = def.instructions.iter_mut().find(|i| i.mnemonic == "ldi").unwrap();
        ldi.semantics_script = Some("cursor = cursor + 8;".into());
        ldi.semantics_mode = ScriptMode::Append;
    })
    .unwrap_err();
    assert!(matches!(err, IsaError::Script { source: SandboxError::Violation(_), .. }), "{err:?}");
}

#[test]
fn runtime_violation_yields_no_image() {
    for size in [Some(0), None] {
        let model = with_directive(".poke", "set_reg(\"r99\", 1);", size).unwrap();
        let diags = assemble(&model, "    nop\n    .poke\n    halt\n").unwrap_err();
        assert_eq!(diags.len(), 1);
        assert!(matches!(diags.0[0].error, AsmError::SandboxViolation(_)), "{diags}");
        assert_eq!(diags.0[0].pos.as_ref().map(|p| p.line), Some(2));
    }
}

#[test]
fn runaway_scripts_hit_the_step_budget() {
    let model = with_directive(".spin", "while 1 { }", Some(0)).unwrap();
    let diags = assemble(&model, "    .spin\n").unwrap_err();
    assert!(matches!(&diags.0[0].error, AsmError::ExecutionError(m) if m.contains("step")), "{diags}");
}

#[test]
fn failed_statement_does_not_hide_later_errors() {
    let model = with_directive(".poke", "set_reg(\"r99\", 1);", Some(2)).unwrap();
    let diags = assemble(&model, "    .poke\n    .poke\n").unwrap_err();
    assert_eq!(diags.len(), 2);
}

#[test]
fn scripts_see_the_register_file_they_changed() {
    let model = common::toy16();
    let img = asm(&model, "    .regset x3, 0x1234\n    .regval x3\n    .regval zero\n");
    assert_eq!(img.bytes, vec![0x34, 0x12, 0, 0]);
}
