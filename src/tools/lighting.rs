//! Light tools: inventory with device profiles and direct control

use crate::scenes::LightControlRequest;
use crate::tools::{run_tool, ToolContext, ToolResponse};
use serde_json::json;

/// All lights with current state and device profile
pub async fn list_lights(context: ToolContext) -> ToolResponse {
    run_tool("list_lights", json!({}), context.engine.list_lights()).await
}

/// Set one light; colour bulbs that need it get split commands
pub async fn control_light(context: ToolContext, request: LightControlRequest) -> ToolResponse {
    if let Some(brightness) = request.brightness {
        if brightness == 0 && request.state.is_none() {
            return ToolResponse::error(
                "Brightness 0 is ambiguous; use state \"off\" to turn a light off".to_string(),
            );
        }
    }
    let params = serde_json::to_value(&request).unwrap_or_default();
    run_tool("control_light", params, context.engine.control_light(request)).await
}

/// Reachability, credentials and local store status
pub async fn check_connection(context: ToolContext) -> ToolResponse {
    run_tool(
        "check_connection",
        json!({}),
        context.engine.check_connection(),
    )
    .await
}

/// Retry counters for every remote call made so far
pub async fn retry_stats(context: ToolContext) -> ToolResponse {
    run_tool("retry_stats", json!({}), async {
        Ok(context.engine.retry_stats().await)
    })
    .await
}
