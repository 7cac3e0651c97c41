use std::sync::Arc;

use chrono::Utc;
use config::MonitorConfig;
use models::{ResourceInfo, ResourceState, ResourceUpdate};
use tokio::{sync::mpsc::UnboundedSender, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::pool::ResourcePool;

/// Polls a freshly created compute resource until it turns active or failed, then publishes
/// the outcome. Gives up with `failed` after `config.max_polls` samples, and stops quietly if
/// the resource is released in the meantime.
pub fn spawn_monitor(
    pool: Arc<ResourcePool>,
    event_id: String,
    resource_id: String,
    config: MonitorConfig,
    updates: UnboundedSender<ResourceUpdate>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last: Option<ResourceInfo> = None;

        for poll in 1..=config.max_polls {
            tokio::time::sleep(config.poll_interval()).await;

            let Some(resource) = pool.allocated_resource(&resource_id) else {
                debug!("{resource_id} for event {event_id} was released, no longer monitoring");
                return;
            };

            match pool.get_resource_info(&resource).await {
                Ok(info) => {
                    let state = info.resource_state();
                    last = Some(info);
                    if state.is_terminal() {
                        info!("{resource_id} for event {event_id} is {state} after {poll} polls");
                        publish(&updates, event_id, resource_id, state, last);
                        return;
                    }
                }
                Err(e) => warn!("Failed to poll {resource_id} for event {event_id}: {e}"),
            }
        }

        warn!(
            "{resource_id} for event {event_id} didn't settle within {} polls, marking it failed",
            config.max_polls
        );
        publish(&updates, event_id, resource_id, ResourceState::Failed, last);
    })
}

fn publish(
    updates: &UnboundedSender<ResourceUpdate>,
    event_id: String,
    resource_id: String,
    resource_state: ResourceState,
    info: Option<ResourceInfo>,
) {
    let update = ResourceUpdate {
        event_id,
        resource_id,
        resource_state,
        info,
        published_at: Utc::now(),
    };
    if updates.send(update).is_err() {
        debug!("nobody is listening for resource updates");
    }
}
