//! Host resource probing via `sysinfo`.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::Serialize;
use sysinfo::{Disks, ProcessesToUpdate, System};

use crate::tools::ToolError;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Point-in-time CPU, memory and root-disk usage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SystemSnapshot {
    pub cpu_percent: f32,
    pub ram_used: u64,
    pub ram_total: u64,
    pub disk_used: u64,
    pub disk_total: u64,
}

impl SystemSnapshot {
    pub fn ram_percent(&self) -> f32 {
        percent(self.ram_used, self.ram_total)
    }

    pub fn disk_percent(&self) -> f32 {
        percent(self.disk_used, self.disk_total)
    }
}

fn percent(used: u64, total: u64) -> f32 {
    if total == 0 {
        0.0
    } else {
        (used as f64 / total as f64 * 100.0) as f32
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f32,
    pub memory_percent: f32,
}

/// Source of resource readings.
#[async_trait]
pub trait ResourceProbe: Send + Sync {
    async fn snapshot(&self) -> Result<SystemSnapshot, ToolError>;

    /// Top `n` processes by CPU usage.
    async fn top_processes(&self, n: usize) -> Result<Vec<ProcessInfo>, ToolError>;
}

/// Reads the local machine.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoProbe;

#[async_trait]
impl ResourceProbe for SysinfoProbe {
    async fn snapshot(&self) -> Result<SystemSnapshot, ToolError> {
        tokio::task::spawn_blocking(|| {
            let mut sys = System::new();
            // CPU usage is a delta between two refreshes.
            sys.refresh_cpu_usage();
            std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
            sys.refresh_cpu_usage();
            sys.refresh_memory();

            let disks = Disks::new_with_refreshed_list();
            let root = disks
                .list()
                .iter()
                .find(|d| d.mount_point() == Path::new("/"))
                .or_else(|| disks.list().first());
            let (disk_used, disk_total) = root
                .map(|d| (d.total_space().saturating_sub(d.available_space()), d.total_space()))
                .unwrap_or((0, 0));

            SystemSnapshot {
                cpu_percent: sys.global_cpu_usage(),
                ram_used: sys.used_memory(),
                ram_total: sys.total_memory(),
                disk_used,
                disk_total,
            }
        })
        .await
        .map_err(|e| ToolError::ExecutionFailed(format!("resource probe panicked: {}", e)))
    }

    async fn top_processes(&self, n: usize) -> Result<Vec<ProcessInfo>, ToolError> {
        tokio::task::spawn_blocking(move || {
            let mut sys = System::new();
            sys.refresh_memory();
            sys.refresh_processes(ProcessesToUpdate::All, true);
            std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
            sys.refresh_processes(ProcessesToUpdate::All, true);

            let total = sys.total_memory();
            let mut processes: Vec<ProcessInfo> = sys
                .processes()
                .iter()
                .map(|(pid, p)| ProcessInfo {
                    pid: pid.as_u32(),
                    name: p.name().to_string_lossy().into_owned(),
                    cpu_percent: p.cpu_usage(),
                    memory_percent: percent(p.memory(), total),
                })
                .collect();
            processes.sort_by(|a, b| b.cpu_percent.total_cmp(&a.cpu_percent));
            processes.truncate(n);
            processes
        })
        .await
        .map_err(|e| ToolError::ExecutionFailed(format!("process probe panicked: {}", e)))
    }
}

/// The GET_STATS reply.
pub fn format_stats(s: &SystemSnapshot, now: DateTime<Local>) -> String {
    format!(
        "*System Stats*\nCPU: {:.1}%\nRAM: {:.1}GB / {:.1}GB ({:.1}%)\nDisk: {:.1}GB / {:.1}GB ({:.1}%)\nTime: {}",
        s.cpu_percent,
        s.ram_used as f64 / GIB,
        s.ram_total as f64 / GIB,
        s.ram_percent(),
        s.disk_used as f64 / GIB,
        s.disk_total as f64 / GIB,
        s.disk_percent(),
        now.format("%A %d %B, %H:%M:%S"),
    )
}

/// The GET_PROCESSES reply.
pub fn format_processes(processes: &[ProcessInfo]) -> String {
    let mut out = String::from("*Top Processes:*\n");
    for p in processes {
        out.push_str(&format!(
            "- {} CPU:{:.1}% RAM:{:.1}%\n",
            p.name, p.cpu_percent, p.memory_percent
        ));
    }
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::TimeZone;

    use super::*;

    /// Fixed readings for tests elsewhere in the crate.
    pub(crate) struct FixedProbe(pub SystemSnapshot);

    #[async_trait]
    impl ResourceProbe for FixedProbe {
        async fn snapshot(&self) -> Result<SystemSnapshot, ToolError> {
            Ok(self.0)
        }

        async fn top_processes(&self, _n: usize) -> Result<Vec<ProcessInfo>, ToolError> {
            Ok(vec![ProcessInfo {
                pid: 1,
                name: "init".to_string(),
                cpu_percent: 0.5,
                memory_percent: 0.1,
            }])
        }
    }

    pub(crate) fn snapshot(cpu: f32, ram: f32, disk: f32) -> SystemSnapshot {
        SystemSnapshot {
            cpu_percent: cpu,
            ram_used: (ram * 100.0) as u64,
            ram_total: 10_000,
            disk_used: (disk * 100.0) as u64,
            disk_total: 10_000,
        }
    }

    #[test]
    fn test_percentages() {
        let s = snapshot(12.0, 50.0, 75.0);
        assert!((s.ram_percent() - 50.0).abs() < 0.01);
        assert!((s.disk_percent() - 75.0).abs() < 0.01);
    }

    #[test]
    fn test_zero_totals() {
        let s = SystemSnapshot {
            cpu_percent: 0.0,
            ram_used: 5,
            ram_total: 0,
            disk_used: 5,
            disk_total: 0,
        };
        assert_eq!(s.ram_percent(), 0.0);
    }

    #[test]
    fn test_format_stats() {
        let now = Local.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap();
        let text = format_stats(&snapshot(42.0, 61.5, 30.0), now);
        assert!(text.contains("CPU: 42.0%"));
        assert!(text.contains("(61.5%)"));
        assert!(text.contains("(30.0%)"));
        assert!(text.contains("Monday 05 January, 09:00:00"));
    }

    #[test]
    fn test_format_processes() {
        let text = format_processes(&[ProcessInfo {
            pid: 7,
            name: "cargo".to_string(),
            cpu_percent: 98.04,
            memory_percent: 3.0,
        }]);
        assert_eq!(text, "*Top Processes:*\n- cargo CPU:98.0% RAM:3.0%\n");
    }

    #[tokio::test]
    async fn test_sysinfo_probe_reads_host() {
        let snapshot = SysinfoProbe.snapshot().await.unwrap();
        assert!(snapshot.ram_total > 0);
        assert!((0.0..=100.0).contains(&snapshot.ram_percent()));
    }
}
