use models::{ConnectionPointState, ResourceState, VduInfo, VduRequest, VduState};

/// Derives the readiness of a compute resource from what the cloud reports and what was asked
/// for.
pub fn derive_resource_state(info: &VduInfo, request: &VduRequest) -> ResourceState {
    match info.state {
        VduState::Failed => return ResourceState::Failed,
        VduState::Active => {}
        _ => return ResourceState::Pending,
    }

    if info.management_ip.is_none() {
        return ResourceState::Pending;
    }

    if request.allocate_public_address && info.public_ip.is_none() {
        return ResourceState::Pending;
    }

    let active: Vec<_> = info
        .connection_points
        .iter()
        .filter(|cp| cp.state == ConnectionPointState::Active)
        .collect();

    if active.len() != request.connection_points.len()
        || active.iter().any(|cp| cp.ip_address.is_none())
    {
        return ResourceState::Pending;
    }

    ResourceState::Active
}

/// Readiness when no request is cached for the resource.
pub fn resource_state_from_vdu(state: VduState) -> ResourceState {
    match state {
        VduState::Active => ResourceState::Active,
        VduState::Failed => ResourceState::Failed,
        _ => ResourceState::Pending,
    }
}
