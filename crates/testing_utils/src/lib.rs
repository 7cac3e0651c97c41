//! Shared test fixtures and `proptest` strategies for the resource manager crates.

use config::{MonitorConfig, ResourceManagerConfig};
use models::{
    epa::{
        CpuArch, CpuModel, CpuPinningPolicy, GuestEpa, HostAggregate, HostEpa, HypervisorEpa,
        HypervisorType, MempageSize, OvsSupport, PcieDevice, VmFlavor, VswitchEpa,
    },
    EpaAttributes, Flavor, OverlayType, ProviderNetwork, VduRequest, VirtualLinkInfo,
    VirtualLinkState,
};
use proptest::{collection::vec, option, prelude::*};

// This magic library called `ctor` runs before any other step in the test binary.
// We use it to install color_eyre once, since tests run in parallel.
#[ctor::ctor]
fn init() {
    let _ = color_eyre::install();
}

/// Monitor settings that give up within a fraction of a second.
pub fn fast_monitor(max_polls: u32) -> MonitorConfig {
    MonitorConfig {
        poll_interval_ms: 10,
        max_polls,
    }
}

pub fn test_manager_config(default_pool_size: usize, max_polls: u32) -> ResourceManagerConfig {
    ResourceManagerConfig {
        default_pool_size,
        monitor: fast_monitor(max_polls),
    }
}

pub fn compute_request(name: &str, vcpu_count: u32, memory_mb: u64) -> VduRequest {
    VduRequest::new(name, EpaAttributes::with_vm_flavor(vcpu_count, memory_mb))
}

pub fn flavor(id: &str, epa: EpaAttributes) -> Flavor {
    Flavor {
        id: id.to_owned(),
        name: id.to_owned(),
        epa,
    }
}

fn feature_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("REQUIRE_AES".to_owned()),
        Just("PREFER_AES".to_owned()),
        Just("REQUIRE_AVX".to_owned()),
        Just("REQUIRE_SSE4_2".to_owned()),
        Just("PREFER_VMX".to_owned()),
    ]
}

pub fn vm_flavor_strategy() -> impl Strategy<Value = VmFlavor> {
    (
        option::of(1u32..64),
        option::of(256u64..65536),
        option::of(1u64..500),
    )
        .prop_map(|(vcpu_count, memory_mb, storage_gb)| VmFlavor {
            vcpu_count,
            memory_mb,
            storage_gb,
        })
}

pub fn guest_epa_strategy() -> impl Strategy<Value = GuestEpa> {
    (
        option::of(any::<bool>()),
        option::of(prop_oneof![
            Just(MempageSize::Large),
            Just(MempageSize::Small),
            Just(MempageSize::Size2Mb),
            Just(MempageSize::PreferLarge),
        ]),
        option::of(prop_oneof![
            Just(CpuPinningPolicy::Dedicated),
            Just(CpuPinningPolicy::Shared),
            Just(CpuPinningPolicy::Any),
        ]),
        vec(
            ("[a-f0-9]{4}", 1u32..4).prop_map(|(device_id, count)| PcieDevice { device_id, count }),
            0..3,
        ),
    )
        .prop_map(
            |(trusted_execution, mempage_size, cpu_pinning_policy, pcie_device)| GuestEpa {
                trusted_execution,
                mempage_size,
                cpu_pinning_policy,
                pcie_device,
                ..Default::default()
            },
        )
}

pub fn host_epa_strategy() -> impl Strategy<Value = HostEpa> {
    (
        option::of(prop_oneof![
            Just(CpuModel::PreferHaswell),
            Just(CpuModel::RequireHaswell),
            Just(CpuModel::RequireBroadwell),
        ]),
        option::of(prop_oneof![
            Just(CpuArch::PreferX86_64),
            Just(CpuArch::RequireX86_64),
            Just(CpuArch::RequireArmv8),
        ]),
        option::of(1u32..4),
        vec(feature_strategy(), 0..4),
    )
        .prop_map(
            |(cpu_model, cpu_arch, cpu_socket_count, cpu_feature)| HostEpa {
                cpu_model,
                cpu_arch,
                cpu_socket_count,
                cpu_feature,
                ..Default::default()
            },
        )
}

pub fn vswitch_epa_strategy() -> impl Strategy<Value = VswitchEpa> {
    let support = || {
        option::of(prop_oneof![
            Just(OvsSupport::Mandatory),
            Just(OvsSupport::Preferred),
            Just(OvsSupport::Disabled),
        ])
    };
    (support(), support()).prop_map(|(ovs_acceleration, ovs_offload)| VswitchEpa {
        ovs_acceleration,
        ovs_offload,
    })
}

pub fn hypervisor_epa_strategy() -> impl Strategy<Value = HypervisorEpa> {
    (
        option::of(prop_oneof![
            Just(HypervisorType::PreferKvm),
            Just(HypervisorType::RequireKvm),
        ]),
        option::of("[0-9]\\.[0-9]"),
    )
        .prop_map(|(hypervisor_type, version)| HypervisorEpa {
            hypervisor_type,
            version,
        })
}

pub fn epa_attributes_strategy() -> impl Strategy<Value = EpaAttributes> {
    (
        option::of(vm_flavor_strategy()),
        option::of(guest_epa_strategy()),
        option::of(host_epa_strategy()),
        option::of(vswitch_epa_strategy()),
        option::of(hypervisor_epa_strategy()),
        vec(
            ("[a-z]{1,6}", "[a-z0-9]{1,6}").prop_map(|(metadata_key, metadata_value)| {
                HostAggregate {
                    metadata_key,
                    metadata_value,
                }
            }),
            0..3,
        ),
    )
        .prop_map(
            |(vm_flavor, guest_epa, host_epa, vswitch_epa, hypervisor_epa, host_aggregate)| {
                EpaAttributes {
                    vm_flavor,
                    guest_epa,
                    host_epa,
                    vswitch_epa,
                    hypervisor_epa,
                    host_aggregate,
                }
            },
        )
}

pub fn provider_network_strategy() -> impl Strategy<Value = ProviderNetwork> {
    (
        option::of("physnet[0-3]"),
        option::of(prop_oneof![
            Just(OverlayType::Flat),
            Just(OverlayType::Vlan),
            Just(OverlayType::Vxlan),
        ]),
        option::of(1u32..4096),
    )
        .prop_map(
            |(physical_network, overlay_type, segmentation_id)| ProviderNetwork {
                physical_network,
                overlay_type,
                segmentation_id,
            },
        )
}

pub fn virtual_link_info_strategy() -> impl Strategy<Value = VirtualLinkInfo> {
    (
        "vl-[a-z0-9]{6}",
        "[a-z]{3,8}",
        option::of("10\\.[0-9]{1,2}\\.0\\.0/24"),
        option::of(provider_network_strategy()),
    )
        .prop_map(
            |(virtual_link_id, name, subnet, provider_network)| VirtualLinkInfo {
                virtual_link_id,
                name,
                subnet,
                state: VirtualLinkState::Active,
                provider_network,
            },
        )
}
