//! Hardware preset plans.
//!
//! A preset is a (vcpus, memory, disk) bundle with a stable identifier
//! derived from those resources; each preset produces its own snapshot
//! lineage in the manifest.

use crate::args::Cli;
use cmux_manifest::PresetDisplay;

/// Immutable hardware plan for one preset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotPresetPlan {
    pub preset_id: String,
    pub label: String,
    pub cpu_display: String,
    pub memory_display: String,
    pub disk_display: String,
    pub vcpus: u32,
    pub memory_mib: u64,
    pub disk_size_mib: u64,
}

impl SnapshotPresetPlan {
    pub fn new(label: &str, vcpus: u32, memory_mib: u64, disk_size_mib: u64) -> Self {
        Self {
            preset_id: preset_id_from_resources(vcpus, memory_mib, disk_size_mib),
            label: label.to_string(),
            cpu_display: format_cpu_display(vcpus),
            memory_display: format_memory_display(memory_mib),
            disk_display: format_disk_display(disk_size_mib),
            vcpus,
            memory_mib,
            disk_size_mib,
        }
    }

    /// Display fields for the manifest (the plan always wins).
    pub fn display(&self) -> PresetDisplay {
        PresetDisplay {
            preset_id: self.preset_id.clone(),
            label: self.label.clone(),
            cpu: self.cpu_display.clone(),
            memory: self.memory_display.clone(),
            disk: self.disk_display.clone(),
        }
    }
}

fn format_cpu_display(vcpus: u32) -> String {
    format!("{vcpus} vCPU")
}

fn format_memory_display(memory_mib: u64) -> String {
    format!("{} GB RAM", (memory_mib / 1024).max(1))
}

fn format_disk_display(disk_size_mib: u64) -> String {
    format!("{} GB SSD", (disk_size_mib / 1024).max(1))
}

/// `"{v}vcpu_{m}gb_{d}gb"` with GiB floored and clamped to at least 1.
pub fn preset_id_from_resources(vcpus: u32, memory_mib: u64, disk_size_mib: u64) -> String {
    let memory_gb = (memory_mib / 1024).max(1);
    let disk_gb = (disk_size_mib / 1024).max(1);
    format!("{vcpus}vcpu_{memory_gb}gb_{disk_gb}gb")
}

/// Standard + boosted plans from the CLI flags, in declaration order.
pub fn build_preset_plans(cli: &Cli) -> Vec<SnapshotPresetPlan> {
    vec![
        SnapshotPresetPlan::new(
            "Standard workspace",
            cli.standard_vcpus,
            cli.standard_memory,
            cli.standard_disk_size,
        ),
        SnapshotPresetPlan::new(
            "Performance workspace",
            cli.boosted_vcpus,
            cli.boosted_memory,
            cli.boosted_disk_size,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn preset_id_is_derived_from_resources() {
        assert_eq!(preset_id_from_resources(4, 16_384, 49_152), "4vcpu_16gb_48gb");
        assert_eq!(preset_id_from_resources(8, 32_768, 49_152), "8vcpu_32gb_48gb");
        // Sub-GiB values clamp to 1.
        assert_eq!(preset_id_from_resources(1, 512, 512), "1vcpu_1gb_1gb");
    }

    #[test]
    fn default_plans_cover_standard_and_boosted() {
        let cli = Cli::parse_from(["cmux-snapshot"]);
        let plans = build_preset_plans(&cli);
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].preset_id, "4vcpu_16gb_48gb");
        assert_eq!(plans[0].label, "Standard workspace");
        assert_eq!(plans[0].cpu_display, "4 vCPU");
        assert_eq!(plans[0].memory_display, "16 GB RAM");
        assert_eq!(plans[0].disk_display, "48 GB SSD");
        assert_eq!(plans[1].preset_id, "8vcpu_32gb_48gb");
        assert_eq!(plans[1].label, "Performance workspace");
    }

    #[test]
    fn display_fields_feed_the_manifest() {
        let plan = SnapshotPresetPlan::new("Standard workspace", 4, 16_384, 49_152);
        let display = plan.display();
        assert_eq!(display.preset_id, plan.preset_id);
        assert_eq!(display.cpu, "4 vCPU");
        assert_eq!(display.memory, "16 GB RAM");
        assert_eq!(display.disk, "48 GB SSD");
    }
}
