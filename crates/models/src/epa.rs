//! Enhanced Platform Awareness (EPA) attribute tree.
//!
//! Every group and every scalar is optional: a field that is `None` (or an empty list) is
//! *absent*, which is meaningful to the capability matcher. Do not replace these with
//! defaulted values.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Enumerations that carry both a preference grade and a requirement grade.
///
/// A concrete flavor only ever advertises requirement-grade values, so requests are
/// normalized through this before being compared.
pub trait RequirementGrade: Sized {
    fn requirement_grade(self) -> Self;
}

/// Declares an enum made of `PREFER_X` / `REQUIRE_X` pairs along with its
/// [`RequirementGrade`] impl.
macro_rules! graded_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($prefer:ident, $require:ident => $pstr:literal, $rstr:literal;)+
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Serialize, Deserialize, Clone, Copy, Debug, Hash, Eq, PartialEq, EnumString, Display,
            JsonSchema,
        )]
        pub enum $name {
            $(
                #[serde(rename = $pstr)]
                #[strum(serialize = $pstr)]
                $prefer,
                #[serde(rename = $rstr)]
                #[strum(serialize = $rstr)]
                $require,
            )+
        }

        impl RequirementGrade for $name {
            fn requirement_grade(self) -> Self {
                match self {
                    $(Self::$prefer | Self::$require => Self::$require,)+
                }
            }
        }
    };
}

graded_enum! {
    pub enum CpuModel {
        PreferWestmere, RequireWestmere => "PREFER_WESTMERE", "REQUIRE_WESTMERE";
        PreferSandybridge, RequireSandybridge => "PREFER_SANDYBRIDGE", "REQUIRE_SANDYBRIDGE";
        PreferIvybridge, RequireIvybridge => "PREFER_IVYBRIDGE", "REQUIRE_IVYBRIDGE";
        PreferHaswell, RequireHaswell => "PREFER_HASWELL", "REQUIRE_HASWELL";
        PreferBroadwell, RequireBroadwell => "PREFER_BROADWELL", "REQUIRE_BROADWELL";
        PreferNehalem, RequireNehalem => "PREFER_NEHALEM", "REQUIRE_NEHALEM";
        PreferPenryn, RequirePenryn => "PREFER_PENRYN", "REQUIRE_PENRYN";
        PreferConroe, RequireConroe => "PREFER_CONROE", "REQUIRE_CONROE";
        PreferCore2duo, RequireCore2duo => "PREFER_CORE2DUO", "REQUIRE_CORE2DUO";
    }
}

graded_enum! {
    pub enum CpuArch {
        PreferX86, RequireX86 => "PREFER_X86", "REQUIRE_X86";
        PreferX86_64, RequireX86_64 => "PREFER_X86_64", "REQUIRE_X86_64";
        PreferI686, RequireI686 => "PREFER_I686", "REQUIRE_I686";
        PreferIa64, RequireIa64 => "PREFER_IA64", "REQUIRE_IA64";
        PreferArmv7, RequireArmv7 => "PREFER_ARMV7", "REQUIRE_ARMV7";
        PreferArmv8, RequireArmv8 => "PREFER_ARMV8", "REQUIRE_ARMV8";
    }
}

graded_enum! {
    pub enum HypervisorType {
        PreferKvm, RequireKvm => "PREFER_KVM", "REQUIRE_KVM";
    }
}

#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, Hash, Eq, PartialEq, EnumString, Display, JsonSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum MempageSize {
    Large,
    Small,
    #[serde(rename = "SIZE_2MB")]
    #[strum(serialize = "SIZE_2MB")]
    Size2Mb,
    #[serde(rename = "SIZE_1GB")]
    #[strum(serialize = "SIZE_1GB")]
    Size1Gb,
    PreferLarge,
}

impl RequirementGrade for MempageSize {
    fn requirement_grade(self) -> Self {
        match self {
            Self::PreferLarge => Self::Large,
            other => other,
        }
    }
}

#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, Hash, Eq, PartialEq, EnumString, Display, JsonSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum CpuPinningPolicy {
    Dedicated,
    Shared,
    Any,
}

#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, Hash, Eq, PartialEq, EnumString, Display, JsonSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum CpuThreadPinningPolicy {
    Avoid,
    Separate,
    Isolate,
    Prefer,
}

#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, Hash, Eq, PartialEq, EnumString, Display, JsonSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum NumaMemPolicy {
    Strict,
    Preferred,
}

/// Shared by `ovs_acceleration` and `ovs_offload`.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, Hash, Eq, PartialEq, EnumString, Display, JsonSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum OvsSupport {
    Mandatory,
    Preferred,
    Disabled,
}

impl RequirementGrade for OvsSupport {
    fn requirement_grade(self) -> Self {
        match self {
            Self::Preferred => Self::Mandatory,
            other => other,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, Hash, JsonSchema)]
#[serde(default)]
pub struct VmFlavor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vcpu_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_gb: Option<u64>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, JsonSchema)]
pub struct PcieDevice {
    pub device_id: String,
    pub count: u32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, JsonSchema)]
pub struct NumaNode {
    pub id: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vcpu: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u64>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, Hash, JsonSchema)]
#[serde(default)]
pub struct NumaNodePolicy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_cnt: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mem_policy: Option<NumaMemPolicy>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub node: Vec<NumaNode>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, Hash, JsonSchema)]
#[serde(default)]
pub struct GuestEpa {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trusted_execution: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mempage_size: Option<MempageSize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_pinning_policy: Option<CpuPinningPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_thread_pinning_policy: Option<CpuThreadPinningPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numa_node_policy: Option<NumaNodePolicy>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pcie_device: Vec<PcieDevice>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, Hash, JsonSchema)]
#[serde(default)]
pub struct HostEpa {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_model: Option<CpuModel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_arch: Option<CpuArch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_vendor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_socket_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_core_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_core_thread_count: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cpu_feature: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub om_cpu_model_string: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub om_cpu_feature: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, Hash, JsonSchema)]
#[serde(default)]
pub struct VswitchEpa {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ovs_acceleration: Option<OvsSupport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ovs_offload: Option<OvsSupport>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, Hash, JsonSchema)]
#[serde(default)]
pub struct HypervisorEpa {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub hypervisor_type: Option<HypervisorType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, JsonSchema)]
pub struct HostAggregate {
    pub metadata_key: String,
    pub metadata_value: String,
}

/// The full set of capability groups carried by both flavors and compute requests.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, Hash, JsonSchema)]
#[serde(default)]
pub struct EpaAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm_flavor: Option<VmFlavor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_epa: Option<GuestEpa>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_epa: Option<HostEpa>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vswitch_epa: Option<VswitchEpa>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hypervisor_epa: Option<HypervisorEpa>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub host_aggregate: Vec<HostAggregate>,
}

/// `PREFER_AES` style feature strings become `REQUIRE_AES`; anything else is left alone.
pub fn requirement_grade_feature(feature: &str) -> String {
    match feature.strip_prefix("PREFER_") {
        Some(rest) => format!("REQUIRE_{rest}"),
        None => feature.to_owned(),
    }
}

impl GuestEpa {
    pub fn normalized(&self) -> Self {
        Self {
            mempage_size: self.mempage_size.map(RequirementGrade::requirement_grade),
            ..self.clone()
        }
    }
}

impl HostEpa {
    pub fn normalized(&self) -> Self {
        Self {
            cpu_model: self.cpu_model.map(RequirementGrade::requirement_grade),
            cpu_arch: self.cpu_arch.map(RequirementGrade::requirement_grade),
            cpu_feature: self
                .cpu_feature
                .iter()
                .map(|f| requirement_grade_feature(f))
                .collect(),
            om_cpu_feature: self
                .om_cpu_feature
                .iter()
                .map(|f| requirement_grade_feature(f))
                .collect(),
            ..self.clone()
        }
    }
}

impl VswitchEpa {
    pub fn normalized(&self) -> Self {
        Self {
            ovs_acceleration: self.ovs_acceleration.map(RequirementGrade::requirement_grade),
            ovs_offload: self.ovs_offload.map(RequirementGrade::requirement_grade),
        }
    }
}

impl HypervisorEpa {
    pub fn normalized(&self) -> Self {
        Self {
            hypervisor_type: self.hypervisor_type.map(RequirementGrade::requirement_grade),
            version: self.version.clone(),
        }
    }
}

impl EpaAttributes {
    /// Returns a copy with every preference-grade value replaced by its requirement grade.
    pub fn normalized(&self) -> Self {
        Self {
            vm_flavor: self.vm_flavor.clone(),
            guest_epa: self.guest_epa.as_ref().map(GuestEpa::normalized),
            host_epa: self.host_epa.as_ref().map(HostEpa::normalized),
            vswitch_epa: self.vswitch_epa.as_ref().map(VswitchEpa::normalized),
            hypervisor_epa: self.hypervisor_epa.as_ref().map(HypervisorEpa::normalized),
            host_aggregate: self.host_aggregate.clone(),
        }
    }

    pub fn with_vm_flavor(vcpu_count: u32, memory_mb: u64) -> Self {
        Self {
            vm_flavor: Some(VmFlavor {
                vcpu_count: Some(vcpu_count),
                memory_mb: Some(memory_mb),
                storage_gb: None,
            }),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::str::FromStr;

    impl Arbitrary for CpuModel {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;

        fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
            prop_oneof![
                Just(CpuModel::PreferWestmere),
                Just(CpuModel::RequireWestmere),
                Just(CpuModel::PreferHaswell),
                Just(CpuModel::RequireHaswell),
                Just(CpuModel::PreferCore2duo),
                Just(CpuModel::RequireCore2duo),
            ]
            .boxed()
        }
    }

    #[test]
    fn test_graded_enum_serialization() {
        assert_eq!(
            serde_json::to_string(&CpuModel::PreferHaswell).unwrap(),
            "\"PREFER_HASWELL\""
        );
        assert_eq!(
            CpuArch::from_str("REQUIRE_X86_64").unwrap(),
            CpuArch::RequireX86_64
        );
        assert_eq!(MempageSize::Size2Mb.to_string(), "SIZE_2MB");
    }

    #[test]
    fn test_prefer_normalizes_to_require() {
        assert_eq!(
            CpuModel::PreferBroadwell.requirement_grade(),
            CpuModel::RequireBroadwell
        );
        assert_eq!(CpuArch::PreferArmv8.requirement_grade(), CpuArch::RequireArmv8);
        assert_eq!(MempageSize::PreferLarge.requirement_grade(), MempageSize::Large);
        assert_eq!(MempageSize::Size1Gb.requirement_grade(), MempageSize::Size1Gb);
        assert_eq!(OvsSupport::Preferred.requirement_grade(), OvsSupport::Mandatory);
        assert_eq!(OvsSupport::Disabled.requirement_grade(), OvsSupport::Disabled);
    }

    #[test]
    fn test_feature_normalization() {
        assert_eq!(requirement_grade_feature("PREFER_AES"), "REQUIRE_AES");
        assert_eq!(requirement_grade_feature("REQUIRE_AVX"), "REQUIRE_AVX");
        assert_eq!(requirement_grade_feature("avx2"), "avx2");
    }

    #[test]
    fn test_absent_groups_stay_absent() {
        let epa: EpaAttributes =
            serde_yaml::from_str("vm_flavor:\n  vcpu_count: 2\n  memory_mb: 2048\n").unwrap();

        assert_eq!(epa, EpaAttributes::with_vm_flavor(2, 2048));
        assert!(epa.guest_epa.is_none());
        assert!(epa.host_aggregate.is_empty());

        let json = serde_json::to_value(&epa).unwrap();
        assert_eq!(json, serde_json::json!({"vm_flavor": {"vcpu_count": 2, "memory_mb": 2048}}));
    }

    #[test]
    fn test_nested_normalization() {
        let epa = EpaAttributes {
            host_epa: Some(HostEpa {
                cpu_model: Some(CpuModel::PreferIvybridge),
                cpu_feature: vec!["PREFER_AVX".to_owned(), "sse4".to_owned()],
                ..Default::default()
            }),
            guest_epa: Some(GuestEpa {
                mempage_size: Some(MempageSize::PreferLarge),
                ..Default::default()
            }),
            ..Default::default()
        };

        let normalized = epa.normalized();
        let host = normalized.host_epa.unwrap();
        assert_eq!(host.cpu_model, Some(CpuModel::RequireIvybridge));
        assert_eq!(host.cpu_feature, vec!["REQUIRE_AVX", "sse4"]);
        assert_eq!(
            normalized.guest_epa.unwrap().mempage_size,
            Some(MempageSize::Large)
        );
    }

    proptest! {
        #[test]
        fn test_requirement_grade_is_idempotent(model in any::<CpuModel>()) {
            let once = model.requirement_grade();
            prop_assert_eq!(once, once.requirement_grade());
        }
    }
}
