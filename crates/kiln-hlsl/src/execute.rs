//! Entry point lowering: dispatch parameters, thread-group attribute and bounds guard.

use crate::model::ShaderTypeModel;
use crate::program::ShaderKind;
use crate::rewrite::{HlslStmt, RewrittenMethod, SpecialIds};

/// Output texture of pixel shaders, bound to `u0`.
pub const OUTPUT_TEXTURE: &str = "__outputTexture";

/// Turns the rewritten `Execute` method into the HLSL entry point for `model.kind`.
///
/// Dispatched shaders get `[numthreads]`, the `SV_*` parameters their body reads and a
/// guard that skips threads outside the dispatch extent. D2D pixel shaders keep their
/// `float4` signature; the emitter wraps it in `D2D_PS_ENTRY`.
pub fn lower_entry(
    mut entry: RewrittenMethod,
    model: &ShaderTypeModel,
    special_ids: SpecialIds,
) -> RewrittenMethod {
    if !model.kind.is_dispatched() {
        return entry;
    }

    let [x, y, z] = model.dispatch.thread_group_size;
    entry.attributes = vec![format!("[numthreads({x}, {y}, {z})]")];
    entry.return_type = "void".to_string();
    entry.params = dispatch_params(special_ids);

    let guard = match model.kind {
        ShaderKind::Pixel => "ThreadIds.x < __x && ThreadIds.y < __y",
        _ => "ThreadIds.x < __x && ThreadIds.y < __y && ThreadIds.z < __z",
    };
    let body = std::mem::take(&mut entry.body);
    entry.body = vec![HlslStmt::If {
        cond: guard.to_string(),
        then: Box::new(HlslStmt::Block(body)),
        otherwise: None,
    }];
    entry
}

fn dispatch_params(special_ids: SpecialIds) -> Vec<String> {
    let mut params = vec!["uint3 ThreadIds : SV_DispatchThreadID".to_string()];
    if special_ids.contains(SpecialIds::GROUP_THREAD_IDS) {
        params.push("uint3 GroupIds : SV_GroupThreadID".to_string());
    }
    if special_ids.contains(SpecialIds::GROUP_INDEX) {
        params.push("uint __GroupIds__get_Index : SV_GroupIndex".to_string());
    }
    if special_ids.contains(SpecialIds::GRID_IDS) {
        params.push("uint3 GridIds : SV_GroupID".to_string());
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameters_follow_used_ids() {
        assert_eq!(
            dispatch_params(SpecialIds::empty()),
            ["uint3 ThreadIds : SV_DispatchThreadID"]
        );
        assert_eq!(
            dispatch_params(SpecialIds::GROUP_INDEX | SpecialIds::GRID_IDS),
            [
                "uint3 ThreadIds : SV_DispatchThreadID",
                "uint __GroupIds__get_Index : SV_GroupIndex",
                "uint3 GridIds : SV_GroupID",
            ]
        );
    }
}
