//! Resource cgroup sizing and configuration scripts.
//!
//! Every provisioning command joins one cgroup sized to the preset so a
//! runaway build cannot starve the services under test. Configuration
//! prefers the cgroup-v2 interface, falls back to the legacy v1 tools, and
//! degrades to no isolation when neither is available.

/// Named bundle of cgroup knobs. Any knob may be absent.
///
/// Invariants: `cpu_quota` and `cpu_period` are set together;
/// `memory_high <= memory_max`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceProfile {
    pub name: String,
    pub cpu_quota: Option<u64>,
    pub cpu_period: Option<u64>,
    pub cpu_weight: Option<u32>,
    pub memory_high: Option<u64>,
    pub memory_max: Option<u64>,
    pub io_weight: Option<u32>,
}

impl ResourceProfile {
    /// Path of the v2 cgroup this profile configures.
    pub fn cgroup_path(&self) -> String {
        format!("/sys/fs/cgroup/{}", self.name)
    }
}

const CPU_PERIOD: u64 = 100_000;

/// Derive the provisioning profile from preset resources: 90% of the CPU
/// allotment, memory high at 9/10 and max at 95/100 of the preset.
pub fn build_resource_profile(vcpus: u32, memory_mib: u64) -> ResourceProfile {
    let cpu_quota = if vcpus > 0 {
        Some(((u64::from(vcpus) * CPU_PERIOD) * 9 / 10).max(CPU_PERIOD))
    } else {
        None
    };

    let memory_bytes = memory_mib * 1024 * 1024;
    let (memory_high, memory_max) = if memory_bytes > 0 {
        let high = (memory_bytes * 9 / 10).max(1);
        let max = (memory_bytes * 95 / 100).max(high);
        (Some(high), Some(max))
    } else {
        (None, None)
    };

    ResourceProfile {
        name: "cmux-provision".to_string(),
        cpu_quota,
        cpu_period: cpu_quota.map(|_| CPU_PERIOD),
        cpu_weight: Some(80),
        memory_high,
        memory_max,
        io_weight: Some(200),
    }
}

fn opt_str<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(T::to_string).unwrap_or_default()
}

/// Shell script that applies the profile. Writes only non-empty knobs,
/// enabling the `cpu`, `io`, and `memory` controllers in the parent
/// `subtree_control` first; exits 0 on hosts without cgroup support.
pub fn configure_script(profile: &ResourceProfile) -> String {
    let cgroup_path = profile.cgroup_path();
    let quoted_path = shlex::try_quote(&cgroup_path)
        .map(|q| q.into_owned())
        .unwrap_or_else(|_| cgroup_path.clone());
    let cpu_max_value = match (profile.cpu_quota, profile.cpu_period) {
        (Some(quota), Some(period)) => format!("{quota} {period}"),
        _ => String::new(),
    };
    let cpu_quota_value = opt_str(&profile.cpu_quota);
    let cpu_period_value = opt_str(&profile.cpu_period);
    let cpu_weight_value = opt_str(&profile.cpu_weight);
    let memory_high_value = opt_str(&profile.memory_high);
    let memory_max_value = opt_str(&profile.memory_max);
    let io_weight_value = opt_str(&profile.io_weight);
    let name = &profile.name;

    format!(
        r#"set -euo pipefail
CG_ROOT="/sys/fs/cgroup"
if [ -f "${{CG_ROOT}}/cgroup.controllers" ]; then
    TARGET={quoted_path}
    mkdir -p "${{TARGET}}"
    controllers="$(cat "${{CG_ROOT}}/cgroup.controllers")"
    enable_controller() {{
        local ctrl="$1"
        if printf '%s' "${{controllers}}" | grep -qw "$ctrl"; then
            if ! grep -qw "$ctrl" "${{CG_ROOT}}/cgroup.subtree_control"; then
                echo "+$ctrl" > "${{CG_ROOT}}/cgroup.subtree_control" || true
            fi
        fi
    }}
    enable_controller cpu
    enable_controller io
    enable_controller memory
    if [ -n "{cpu_max_value}" ] && [ -w "${{TARGET}}/cpu.max" ]; then
        echo "{cpu_max_value}" > "${{TARGET}}/cpu.max"
    fi
    if [ -n "{cpu_weight_value}" ] && [ -w "${{TARGET}}/cpu.weight" ]; then
        echo "{cpu_weight_value}" > "${{TARGET}}/cpu.weight"
    fi
    if [ -n "{memory_high_value}" ] && [ -w "${{TARGET}}/memory.high" ]; then
        echo "{memory_high_value}" > "${{TARGET}}/memory.high"
    fi
    if [ -n "{memory_max_value}" ] && [ -w "${{TARGET}}/memory.max" ]; then
        echo "{memory_max_value}" > "${{TARGET}}/memory.max"
    fi
    if [ -n "{io_weight_value}" ] && [ -w "${{TARGET}}/io.weight" ]; then
        echo "{io_weight_value}" > "${{TARGET}}/io.weight"
    fi
    exit 0
fi
if command -v cgcreate >/dev/null 2>&1 && command -v cgset >/dev/null 2>&1; then
    cgcreate -g cpu,memory,blkio:{name} || true
    if [ -n "{cpu_period_value}" ] && [ -n "{cpu_quota_value}" ]; then
        cgset -r cpu.cfs_period_us={cpu_period_value} {name} || true
        cgset -r cpu.cfs_quota_us={cpu_quota_value} {name} || true
    fi
    if [ -n "{memory_max_value}" ]; then
        cgset -r memory.limit_in_bytes={memory_max_value} {name} || true
    fi
    if [ -n "{memory_high_value}" ]; then
        cgset -r memory.soft_limit_in_bytes={memory_high_value} {name} || true
    fi
    if [ -n "{io_weight_value}" ]; then
        cgset -r blkio.weight={io_weight_value} {name} || true
    fi
fi
exit 0
"#
    )
}

/// Verification command: prints `ready` when the cgroup and its
/// `cgroup.procs` file exist.
pub fn verify_script(profile: &ResourceProfile) -> String {
    let cgroup_path = profile.cgroup_path();
    let quoted_path = shlex::try_quote(&cgroup_path)
        .map(|q| q.into_owned())
        .unwrap_or_else(|_| cgroup_path.clone());
    format!(
        r#"if [ -d {quoted_path} ] && [ -f {quoted_path}/cgroup.procs ]; then
    echo ready
fi
"#
    )
}
