use crate::error::PlanError;
use crate::record::ClassRecord;
use crate::record::flags::InjKind;

/// Output of one probe-injection pass: the rebuilt `method_info` and how many
/// constant-pool entries the editor appended to the class's growing pool.
pub struct EditedMethod {
    pub method_info: Vec<u8>,
    pub added_cp_entries: u16,
}

/// Splices probes into a method body. The physical rewriting lives outside
/// the planner; implementations see the record read-only and report the new
/// `method_info` back through the return value.
pub trait BytecodeEditor {
    fn inject_probes(
        &mut self,
        record: &ClassRecord,
        method_idx: usize,
        instr_id: u16,
        kind: InjKind,
    ) -> Result<EditedMethod, PlanError>;
}

/// Copies the original `method_info` unchanged. Keeps the plan→pack pipeline
/// runnable when no probe splicer is attached.
pub struct PassthroughEditor;

impl BytecodeEditor for PassthroughEditor {
    fn inject_probes(
        &mut self,
        record: &ClassRecord,
        method_idx: usize,
        _instr_id: u16,
        _kind: InjKind,
    ) -> Result<EditedMethod, PlanError> {
        Ok(EditedMethod {
            method_info: record.method_info(method_idx).to_vec(),
            added_cp_entries: 0,
        })
    }
}
