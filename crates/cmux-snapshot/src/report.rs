//! Operator-facing run summary.

use crate::orchestrator::SnapshotRunResult;

/// Render the verification-URL table with per-column widths.
pub fn render_verification_table(results: &[SnapshotRunResult]) -> Vec<String> {
    if results.is_empty() {
        return Vec::new();
    }
    let headers = ["Preset", "CPU", "Memory", "Disk", "VS Code URL", "VNC URL"];
    let mut rows: Vec<Vec<String>> = vec![headers.iter().map(ToString::to_string).collect()];
    for result in results {
        rows.push(vec![
            result.preset.preset_id.clone(),
            result.preset.cpu_display.clone(),
            result.preset.memory_display.clone(),
            result.preset.disk_display.clone(),
            result.vscode_url.clone(),
            result.vnc_url.clone(),
        ]);
    }

    let widths: Vec<usize> = (0..headers.len())
        .map(|idx| rows.iter().map(|row| row[idx].len()).max().unwrap_or(0))
        .collect();

    rows.iter()
        .map(|row| {
            let cells: Vec<String> = row
                .iter()
                .zip(widths.iter().copied())
                .map(|(cell, width)| format!("{cell:<width$}"))
                .collect();
            format!("  {}", cells.join("  |  "))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presets::SnapshotPresetPlan;

    fn result(preset_id_vcpus: (u32, &str)) -> SnapshotRunResult {
        let (vcpus, snapshot_id) = preset_id_vcpus;
        SnapshotRunResult {
            preset: SnapshotPresetPlan::new("Workspace", vcpus, 16_384, 49_152),
            snapshot_id: snapshot_id.to_string(),
            captured_at: "2026-03-01T00:00:00Z".to_string(),
            vscode_url: format!("https://port-39378-{vcpus}.http.cloud.morph.so"),
            vnc_url: format!("https://port-39380-{vcpus}.http.cloud.morph.so/vnc.html"),
            instance_id: format!("morphvm_{vcpus}"),
        }
    }

    #[test]
    fn table_lines_align_columns() {
        let results = vec![result((4, "snap_a")), result((8, "snap_b"))];
        let lines = render_verification_table(&results);
        assert_eq!(lines.len(), 3, "header plus one row per preset");
        assert!(lines[0].contains("Preset"));
        assert!(lines[1].contains("4vcpu_16gb_48gb"));
        assert!(lines[2].contains("8vcpu_16gb_48gb"));
        // Same separator positions on every line.
        let sep_at: Vec<usize> = lines
            .iter()
            .map(|line| line.find("  |  ").unwrap())
            .collect();
        assert!(sep_at.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn empty_results_render_nothing() {
        assert!(render_verification_table(&[]).is_empty());
    }
}
