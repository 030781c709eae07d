use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use crate::shutdown::DelegatedShutdownListener;

/// Share of the machine's CPU above which the coordinator process is considered too busy.
const HIGH_CPU_PERCENT: f32 = 10.0;

/// Monitor the resource usage of this process and report high usage.
///
/// Local workers generate load from inside this process, so a busy process can mean the machine
/// is the bottleneck rather than the system under test. This won't stop the test, it only warns
/// that the results might be affected.
///
/// The CPU usage is sampled every [sysinfo::MINIMUM_CPU_UPDATE_INTERVAL].
pub(crate) fn start_monitor(mut shutdown_listener: DelegatedShutdownListener) -> anyhow::Result<()> {
    std::thread::Builder::new()
        .name("monitor".to_string())
        .spawn(move || {
            let this_process_pid = Pid::from_u32(std::process::id());
            let mut sys = System::new();

            sys.refresh_cpu_all();
            let cpu_count = sys.cpus().len().max(1);

            loop {
                if shutdown_listener.should_shutdown() {
                    break;
                }

                sys.refresh_processes_specifics(
                    ProcessesToUpdate::Some(&[this_process_pid]),
                    true,
                    ProcessRefreshKind::nothing().with_cpu(),
                );

                match sys.process(this_process_pid) {
                    Some(process) => {
                        let usage = (process.cpu_usage() / (cpu_count * 100) as f32) * 100.0;
                        if usage > HIGH_CPU_PERCENT {
                            log::warn!(
                                "High CPU usage detected. Swarm is using {:.2}% of the CPU, with {} available cores",
                                usage,
                                cpu_count
                            );
                        }
                    }
                    None => {
                        log::debug!("Could not read usage for this process, stopping the monitor");
                        break;
                    }
                }

                std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
            }
        })?;

    Ok(())
}
