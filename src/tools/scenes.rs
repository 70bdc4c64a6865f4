//! Scene tools
//!
//! - `activate_scene`, `diagnose_scene`, `repair_scene`, `sync_scene`
//! - `capture_scene`, `update_scene`, `delete_scene`, `list_scenes`
//! - `list_snapshots`, `restore_snapshot`

use crate::scenes::{CaptureRequest, SceneUpdate};
use crate::tools::{run_tool, ToolContext, ToolResponse};
use serde_json::json;

/// Resolve a scene and drive its lights
pub async fn activate_scene(context: ToolContext, scene_id: String) -> ToolResponse {
    run_tool(
        "activate_scene",
        json!({ "scene_id": scene_id }),
        context.engine.activate_scene(&scene_id),
    )
    .await
}

/// Report how a scene resolves and whether a repair would write anything
pub async fn diagnose_scene(context: ToolContext, scene_id: String) -> ToolResponse {
    run_tool(
        "diagnose_scene",
        json!({ "scene_id": scene_id }),
        context.engine.diagnose_scene(&scene_id),
    )
    .await
}

pub async fn repair_scene(context: ToolContext, scene_id: String) -> ToolResponse {
    run_tool(
        "repair_scene",
        json!({ "scene_id": scene_id }),
        context.engine.repair_scene(&scene_id),
    )
    .await
}

/// Take the controller's copy as the local baseline
pub async fn sync_scene(context: ToolContext, scene_id: String) -> ToolResponse {
    run_tool(
        "sync_scene",
        json!({ "scene_id": scene_id }),
        context.engine.sync_scene(&scene_id),
    )
    .await
}

pub async fn capture_scene(context: ToolContext, request: CaptureRequest) -> ToolResponse {
    let params = serde_json::to_value(&request).unwrap_or_default();
    run_tool("capture_scene", params, context.engine.capture_scene(request)).await
}

pub async fn update_scene(
    context: ToolContext,
    scene_id: String,
    update: SceneUpdate,
) -> ToolResponse {
    let params = json!({ "scene_id": scene_id, "update": update });
    run_tool(
        "update_scene",
        params,
        context.engine.update_scene(&scene_id, update),
    )
    .await
}

pub async fn delete_scene(context: ToolContext, scene_id: String) -> ToolResponse {
    run_tool(
        "delete_scene",
        json!({ "scene_id": scene_id }),
        context.engine.delete_scene(&scene_id),
    )
    .await
}

/// Every known scene with its diagnosis
pub async fn list_scenes(context: ToolContext) -> ToolResponse {
    let response = run_tool("list_scenes", json!({}), context.engine.list_scenes()).await;
    if response.is_success() && response.data.as_array().is_some_and(Vec::is_empty) {
        return ToolResponse::success_with_message(
            json!([]),
            "No scenes found on the controller or in the local backup".to_string(),
        );
    }
    response
}

pub async fn list_snapshots(context: ToolContext, scene_id: Option<String>) -> ToolResponse {
    run_tool(
        "list_snapshots",
        json!({ "scene_id": scene_id }),
        async { Ok(context.engine.list_snapshots(scene_id.as_deref()).await) },
    )
    .await
}

pub async fn restore_snapshot(context: ToolContext, snapshot_id: String) -> ToolResponse {
    run_tool(
        "restore_snapshot",
        json!({ "snapshot_id": snapshot_id }),
        context.engine.restore_snapshot(&snapshot_id),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::error_recovery::RetryPolicy;
    use crate::mock::MockHassTransport;
    use crate::scenes::SceneEngine;
    use crate::storage::{ConfigurationStore, MemoryBlobStore};
    use crate::client::HassApi;
    use std::sync::Arc;
    use std::time::Duration;

    fn context(mock: &Arc<MockHassTransport>) -> ToolContext {
        let api = Arc::new(HassApi::new(
            mock.clone(),
            RetryPolicy::new(3, Duration::from_millis(100)),
        ));
        let store = ConfigurationStore::open(Box::new(MemoryBlobStore::new()), 50).unwrap();
        ToolContext::new(Arc::new(SceneEngine::new(
            api,
            store,
            EngineConfig::default(),
        )))
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_scene_is_not_found() {
        let mock = Arc::new(MockHassTransport::new());
        let response = diagnose_scene(context(&mock), "missing".to_string()).await;
        assert_eq!(response.status, "not_found");
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_and_list() {
        let mock = Arc::new(MockHassTransport::new());
        mock.add_light("light.a", true);
        let ctx = context(&mock);

        let empty = list_scenes(ctx.clone()).await;
        assert!(empty.message.is_some());

        let captured = capture_scene(
            ctx.clone(),
            CaptureRequest {
                scene_id: "reading".into(),
                ..Default::default()
            },
        )
        .await;
        assert!(captured.is_success());
        assert_eq!(captured.data["entity_count"], 1);

        let listed = list_scenes(ctx).await;
        assert_eq!(listed.data[0]["scene_id"], "reading");
    }
}
