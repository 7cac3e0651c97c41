//! In-memory cloud adapter.
//!
//! Instances boot after a configurable number of [`CloudAdapter::get_vdu`] polls, every call
//! is counted, and any operation can be made to fail on demand.

use async_trait::async_trait;
use dashmap::DashMap;
use models::{
    CloudAccount, ConnectionPointInfo, ConnectionPointRequest, ConnectionPointState,
    EpaAttributes, Flavor, ImageInfo, VduInfo, VduInitParams, VduModifyParams, VduState,
    VirtualLinkInfo, VirtualLinkParams, VirtualLinkState,
};
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};
use tracing::debug;

use crate::{AdapterFactory, CalError, CloudAdapter};

/// Account option holding comma separated image names to seed the adapter with.
pub const IMAGES_OPTION: &str = "images";

/// Account option holding the number of polls before a new instance turns active.
pub const BOOT_POLLS_OPTION: &str = "boot_polls";

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum MockOp {
    ListVdus,
    GetVdu,
    CreateVdu,
    ModifyVdu,
    DeleteVdu,
    ListFlavors,
    CreateFlavor,
    ListLinks,
    GetLink,
    CreateLink,
    DeleteLink,
    ListImages,
    GetImage,
}

#[derive(Debug)]
struct MockVdu {
    info: VduInfo,
    public_requested: bool,
    polls_until_active: u32,
}

#[derive(Debug, Default)]
struct MockState {
    vdus: BTreeMap<String, MockVdu>,
    links: BTreeMap<String, VirtualLinkInfo>,
    flavors: Vec<Flavor>,
    images: Vec<ImageInfo>,
    failing: HashSet<MockOp>,
    boot_polls: u32,
    next_address: u32,
}

impl MockState {
    fn next_ip(&mut self, subnet: &str) -> String {
        self.next_address += 1;
        let host = self.next_address;
        format!("{subnet}.{}.{}", host / 250, host % 250 + 2)
    }

    fn activate(&mut self, vdu_id: &str) {
        let mgmt = self.next_ip("10.0");
        let public = self.next_ip("172.16");
        let cp_count = self
            .vdus
            .get(vdu_id)
            .map(|v| v.info.connection_points.len())
            .unwrap_or(0);
        let cp_ips: Vec<String> = (0..cp_count).map(|_| self.next_ip("192.168")).collect();

        if let Some(vdu) = self.vdus.get_mut(vdu_id) {
            vdu.info.state = VduState::Active;
            vdu.info.management_ip.get_or_insert(mgmt);
            if vdu.public_requested {
                vdu.info.public_ip.get_or_insert(public);
            }
            for (cp, ip) in vdu.info.connection_points.iter_mut().zip(cp_ips) {
                cp.state = ConnectionPointState::Active;
                cp.ip_address.get_or_insert(ip);
            }
        }
    }
}

pub struct MockCal {
    account: String,
    state: Mutex<MockState>,
    calls: DashMap<MockOp, usize>,
}

impl MockCal {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            state: Mutex::new(MockState::default()),
            calls: DashMap::new(),
        }
    }

    /// Seeds images and boot delay from the account's options.
    pub fn from_account(account: &CloudAccount) -> Self {
        let mock = Self::new(account.name.clone());

        if let Some(names) = account.options.get(IMAGES_OPTION) {
            for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
                mock.add_image(ImageInfo {
                    id: format!("image-{name}"),
                    name: name.to_owned(),
                    checksum: None,
                });
            }
        }

        if let Some(polls) = account
            .options
            .get(BOOT_POLLS_OPTION)
            .and_then(|p| p.parse().ok())
        {
            mock.set_boot_polls(polls);
        }

        mock
    }

    /// Number of `get_vdu` calls an instance created after this reports `init` for.
    pub fn set_boot_polls(&self, polls: u32) {
        self.state.lock().boot_polls = polls;
    }

    pub fn add_flavor(&self, flavor: Flavor) {
        self.state.lock().flavors.push(flavor);
    }

    pub fn add_image(&self, image: ImageInfo) {
        self.state.lock().images.push(image);
    }

    /// Registers an already running instance, e.g. a static pool member.
    pub fn add_vdu(&self, info: VduInfo) {
        let public_requested = info.public_ip.is_some();
        self.state.lock().vdus.insert(
            info.vdu_id.clone(),
            MockVdu {
                info,
                public_requested,
                polls_until_active: 0,
            },
        );
    }

    pub fn add_virtual_link(&self, info: VirtualLinkInfo) {
        self.state
            .lock()
            .links
            .insert(info.virtual_link_id.clone(), info);
    }

    pub fn set_vdu_state(&self, vdu_id: &str, state: VduState) {
        if let Some(vdu) = self.state.lock().vdus.get_mut(vdu_id) {
            vdu.info.state = state;
            vdu.polls_until_active = 0;
        }
    }

    /// Makes `op` fail until [`MockCal::succeed`] is called for it.
    pub fn fail(&self, op: MockOp) {
        self.state.lock().failing.insert(op);
    }

    pub fn succeed(&self, op: MockOp) {
        self.state.lock().failing.remove(&op);
    }

    pub fn call_count(&self, op: MockOp) -> usize {
        self.calls.get(&op).map(|c| *c).unwrap_or(0)
    }

    pub fn vdu_count(&self) -> usize {
        self.state.lock().vdus.len()
    }

    pub fn link_count(&self) -> usize {
        self.state.lock().links.len()
    }

    pub fn flavors(&self) -> Vec<Flavor> {
        self.state.lock().flavors.clone()
    }

    fn record(&self, op: MockOp, name: &'static str) -> Result<(), CalError> {
        *self.calls.entry(op).or_insert(0) += 1;
        if self.state.lock().failing.contains(&op) {
            debug!("mock account {} failing {name} on request", self.account);
            return Err(CalError::request(name, "injected failure"));
        }
        Ok(())
    }
}

fn cp_info(vdu_id: &str, cp: &ConnectionPointRequest) -> ConnectionPointInfo {
    ConnectionPointInfo {
        name: cp.name.clone(),
        connection_point_id: format!("{vdu_id}-{}", cp.name),
        virtual_link_id: cp.virtual_link_id.clone(),
        state: ConnectionPointState::Inactive,
        ip_address: cp.static_ip_address.clone(),
    }
}

#[async_trait]
impl CloudAdapter for MockCal {
    fn account_name(&self) -> &str {
        &self.account
    }

    async fn get_vdu_list(&self) -> Result<Vec<VduInfo>, CalError> {
        self.record(MockOp::ListVdus, "get_vdu_list")?;
        Ok(self
            .state
            .lock()
            .vdus
            .values()
            .map(|v| v.info.clone())
            .collect())
    }

    async fn get_vdu(&self, vdu_id: &str) -> Result<VduInfo, CalError> {
        self.record(MockOp::GetVdu, "get_vdu")?;
        let mut state = self.state.lock();

        let booted = {
            let vdu = state
                .vdus
                .get_mut(vdu_id)
                .ok_or_else(|| CalError::not_found("vdu", vdu_id))?;
            match vdu.polls_until_active {
                0 => false,
                1 => {
                    vdu.polls_until_active = 0;
                    true
                }
                _ => {
                    vdu.polls_until_active -= 1;
                    false
                }
            }
        };
        if booted {
            state.activate(vdu_id);
        }

        state
            .vdus
            .get(vdu_id)
            .map(|v| v.info.clone())
            .ok_or_else(|| CalError::not_found("vdu", vdu_id))
    }

    async fn create_vdu(&self, params: &VduInitParams) -> Result<String, CalError> {
        self.record(MockOp::CreateVdu, "create_vdu")?;
        let mut state = self.state.lock();

        if !state.flavors.iter().any(|f| f.id == params.flavor_id) {
            return Err(CalError::request(
                "create_vdu",
                format!("unknown flavor {}", params.flavor_id),
            ));
        }
        if let Some(image_id) = &params.image_id {
            if !state.images.iter().any(|i| &i.id == image_id) {
                return Err(CalError::request(
                    "create_vdu",
                    format!("unknown image {image_id}"),
                ));
            }
        }

        let vdu_id = format!("vdu-{}", uuid::Uuid::new_v4());
        let boot_polls = state.boot_polls;
        let info = VduInfo {
            vdu_id: vdu_id.clone(),
            name: params.name.clone(),
            flavor_id: Some(params.flavor_id.clone()),
            image_id: params.image_id.clone(),
            node_id: params.node_id.clone(),
            state: VduState::Init,
            management_ip: None,
            public_ip: None,
            connection_points: params
                .connection_points
                .iter()
                .map(|cp| cp_info(&vdu_id, cp))
                .collect(),
        };
        state.vdus.insert(
            vdu_id.clone(),
            MockVdu {
                info,
                public_requested: params.allocate_public_address,
                polls_until_active: boot_polls,
            },
        );
        if boot_polls == 0 {
            state.activate(&vdu_id);
        }

        Ok(vdu_id)
    }

    async fn modify_vdu(&self, params: &VduModifyParams) -> Result<(), CalError> {
        self.record(MockOp::ModifyVdu, "modify_vdu")?;
        let mut state = self.state.lock();
        let active = {
            let vdu = state
                .vdus
                .get_mut(&params.vdu_id)
                .ok_or_else(|| CalError::not_found("vdu", &params.vdu_id))?;
            vdu.info
                .connection_points
                .retain(|cp| !params.connection_points_remove.contains(&cp.connection_point_id));
            for cp in &params.connection_points_add {
                vdu.info.connection_points.push(cp_info(&params.vdu_id, cp));
            }
            vdu.info.state == VduState::Active
        };

        if active {
            let vdu_id = params.vdu_id.clone();
            let pending = state
                .vdus
                .get(&vdu_id)
                .map(|v| {
                    v.info
                        .connection_points
                        .iter()
                        .filter(|cp| cp.ip_address.is_none())
                        .count()
                })
                .unwrap_or(0);
            let ips: Vec<String> = (0..pending).map(|_| state.next_ip("192.168")).collect();
            if let Some(vdu) = state.vdus.get_mut(&vdu_id) {
                let mut ips = ips.into_iter();
                for cp in vdu.info.connection_points.iter_mut() {
                    cp.state = ConnectionPointState::Active;
                    if cp.ip_address.is_none() {
                        cp.ip_address = ips.next();
                    }
                }
            }
        }

        Ok(())
    }

    async fn delete_vdu(&self, vdu_id: &str) -> Result<(), CalError> {
        self.record(MockOp::DeleteVdu, "delete_vdu")?;
        self.state
            .lock()
            .vdus
            .remove(vdu_id)
            .map(|_| ())
            .ok_or_else(|| CalError::not_found("vdu", vdu_id))
    }

    async fn get_flavor_list(&self) -> Result<Vec<Flavor>, CalError> {
        self.record(MockOp::ListFlavors, "get_flavor_list")?;
        Ok(self.state.lock().flavors.clone())
    }

    async fn create_flavor(&self, name: &str, epa: &EpaAttributes) -> Result<String, CalError> {
        self.record(MockOp::CreateFlavor, "create_flavor")?;
        let id = format!("flavor-{}", uuid::Uuid::new_v4());
        self.state.lock().flavors.push(Flavor {
            id: id.clone(),
            name: name.to_owned(),
            epa: epa.clone(),
        });
        Ok(id)
    }

    async fn get_virtual_link_list(&self) -> Result<Vec<VirtualLinkInfo>, CalError> {
        self.record(MockOp::ListLinks, "get_virtual_link_list")?;
        Ok(self.state.lock().links.values().cloned().collect())
    }

    async fn get_virtual_link(&self, link_id: &str) -> Result<VirtualLinkInfo, CalError> {
        self.record(MockOp::GetLink, "get_virtual_link")?;
        self.state
            .lock()
            .links
            .get(link_id)
            .cloned()
            .ok_or_else(|| CalError::not_found("virtual link", link_id))
    }

    async fn create_virtual_link(&self, params: &VirtualLinkParams) -> Result<String, CalError> {
        self.record(MockOp::CreateLink, "create_virtual_link")?;
        let id = format!("vl-{}", uuid::Uuid::new_v4());
        self.state.lock().links.insert(
            id.clone(),
            VirtualLinkInfo {
                virtual_link_id: id.clone(),
                name: params.name.clone(),
                subnet: params.subnet.clone(),
                state: VirtualLinkState::Active,
                provider_network: params.provider_network.clone(),
            },
        );
        Ok(id)
    }

    async fn delete_virtual_link(&self, link_id: &str) -> Result<(), CalError> {
        self.record(MockOp::DeleteLink, "delete_virtual_link")?;
        self.state
            .lock()
            .links
            .remove(link_id)
            .map(|_| ())
            .ok_or_else(|| CalError::not_found("virtual link", link_id))
    }

    async fn get_image_list(&self) -> Result<Vec<ImageInfo>, CalError> {
        self.record(MockOp::ListImages, "get_image_list")?;
        Ok(self.state.lock().images.clone())
    }

    async fn get_image(&self, image_id: &str) -> Result<ImageInfo, CalError> {
        self.record(MockOp::GetImage, "get_image")?;
        self.state
            .lock()
            .images
            .iter()
            .find(|i| i.id == image_id)
            .cloned()
            .ok_or_else(|| CalError::not_found("image", image_id))
    }
}

/// Keeps one [`MockCal`] per account name so callers can reach the adapter the resource
/// manager is using.
#[derive(Default)]
pub struct MockAdapterFactory {
    adapters: DashMap<String, Arc<MockCal>>,
}

impl MockAdapterFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn adapter(&self, account: &str) -> Arc<MockCal> {
        self.adapters
            .entry(account.to_owned())
            .or_insert_with(|| Arc::new(MockCal::new(account)))
            .clone()
    }
}

impl AdapterFactory for MockAdapterFactory {
    fn create(&self, account: &CloudAccount) -> Result<Arc<dyn CloudAdapter>, CalError> {
        let adapter: Arc<dyn CloudAdapter> = self.adapter(&account.name);
        Ok(adapter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn params(flavor_id: &str) -> VduInitParams {
        VduInitParams {
            name: "vm".to_owned(),
            flavor_id: flavor_id.to_owned(),
            image_id: None,
            connection_points: vec![ConnectionPointRequest {
                name: "eth0".to_owned(),
                virtual_link_id: "vl-1".to_owned(),
                port_security_enabled: false,
                static_ip_address: None,
            }],
            allocate_public_address: true,
            mgmt_network: None,
            node_id: None,
        }
    }

    fn seeded() -> MockCal {
        let mock = MockCal::new("acct");
        mock.add_flavor(Flavor {
            id: "f1".to_owned(),
            name: "small".to_owned(),
            epa: EpaAttributes::with_vm_flavor(1, 512),
        });
        mock
    }

    #[tokio::test]
    async fn test_vdu_boots_after_polls() {
        let mock = seeded();
        mock.set_boot_polls(2);
        let id = mock.create_vdu(&params("f1")).await.unwrap();

        let first = mock.get_vdu(&id).await.unwrap();
        assert_eq!(first.state, VduState::Init);
        assert!(first.management_ip.is_none());

        let second = mock.get_vdu(&id).await.unwrap();
        assert_eq!(second.state, VduState::Active);
        assert!(second.management_ip.is_some());
        assert!(second.public_ip.is_some());
        assert_eq!(second.connection_points[0].state, ConnectionPointState::Active);
        assert!(second.connection_points[0].ip_address.is_some());
    }

    #[tokio::test]
    async fn test_create_vdu_requires_known_flavor() {
        let mock = seeded();
        assert!(mock.create_vdu(&params("nope")).await.is_err());
        assert_eq!(mock.vdu_count(), 0);
        assert_eq!(mock.call_count(MockOp::CreateVdu), 1);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let mock = seeded();
        mock.fail(MockOp::CreateLink);
        let link = VirtualLinkParams {
            name: "net".to_owned(),
            subnet: None,
            provider_network: None,
        };
        assert!(mock.create_virtual_link(&link).await.is_err());

        mock.succeed(MockOp::CreateLink);
        let id = mock.create_virtual_link(&link).await.unwrap();
        assert_eq!(mock.get_virtual_link(&id).await.unwrap().name, "net");
        assert_eq!(mock.call_count(MockOp::CreateLink), 2);
    }

    #[tokio::test]
    async fn test_modify_attaches_connection_points() {
        let mock = seeded();
        let id = mock.create_vdu(&params("f1")).await.unwrap();
        mock.modify_vdu(&VduModifyParams {
            vdu_id: id.clone(),
            connection_points_add: vec![ConnectionPointRequest {
                name: "eth1".to_owned(),
                virtual_link_id: "vl-2".to_owned(),
                port_security_enabled: false,
                static_ip_address: None,
            }],
            connection_points_remove: vec![format!("{id}-eth0")],
        })
        .await
        .unwrap();

        let info = mock.get_vdu(&id).await.unwrap();
        assert_eq!(info.connection_points.len(), 1);
        assert_eq!(info.connection_points[0].name, "eth1");
        assert!(info.connection_points[0].ip_address.is_some());
    }

    #[test]
    fn test_from_account_options() {
        let account = CloudAccount::mock("lab")
            .with_option(IMAGES_OPTION, "ubuntu, fedora")
            .with_option(BOOT_POLLS_OPTION, "3");
        let mock = MockCal::from_account(&account);

        let state = mock.state.lock();
        assert_eq!(state.images.len(), 2);
        assert_eq!(state.images[1].name, "fedora");
        assert_eq!(state.boot_polls, 3);
    }
}
