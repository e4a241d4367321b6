use portal_core::fault::JobError;
use portal_core::job::{Action, JobTable};
use tracing::{error, info, trace, warn};

use crate::bridge::Bridge;
use crate::device::Device;
use crate::hal::BusClient;
use crate::status::{fahrenheit, light_10bit, StatusSnapshot};

/// What a job action may use.
pub struct JobEnv<'a, B> {
    pub dev: &'a mut Device,
    pub bridge: &'a mut Bridge<B>,
    pub now_ms: u64,
}

/// Execute one job action.
pub fn execute<B: BusClient>(action: Action, env: &mut JobEnv<'_, B>) -> Result<(), JobError> {
    match action {
        Action::LocalTime => {
            // the time service pushes updates over the bus; this only counts the slot
            env.dev.counters.inc("local_time_fetch");
            Ok(())
        }

        Action::Weather => {
            env.dev.counters.inc("weather_fetch");
            Ok(())
        }

        Action::UpdateTime => {
            let now = env.dev.clock.now();
            env.dev.display.update_time(&now);
            Ok(())
        }

        Action::SendStatus => {
            let celsius = env.dev.sensors.read_temperature()?;
            let lux = env.dev.sensors.read_light_level()?;
            let snap = StatusSnapshot::collect(env.dev, lux, env.now_ms);
            let body = serde_json::to_string(&snap)
                .map_err(|e| JobError::Other(format!("encode status: {e}")))?;

            let topics = env.bridge.topics().clone();
            env.bridge.publish(&topics.temperature, &fahrenheit(celsius).to_string())?;
            env.bridge.publish(&topics.light, &light_10bit(lux).to_string())?;
            env.bridge.publish(&topics.status, &body)?;
            info!("send_status: {}: {body}", topics.status);
            Ok(())
        }

        Action::LedBlink => {
            let on = env.dev.board.led();
            env.dev.board.set_led(!on);
            Ok(())
        }
    }
}

/// Run job `name` if present. Nothing escapes: every failure becomes a
/// counter bump, a log line and a rescheduling decision.
pub fn run<B: BusClient>(name: &str, jobs: &mut JobTable, env: &mut JobEnv<'_, B>, retry_delay_ms: u64) {
    let Some(job) = jobs.get(name) else { return };
    let action = job.spec.action;
    if job.is_slow() {
        info!("{} job {name} triggered", env.dev.clock.now().format("%H:%M:%S"));
    } else {
        trace!(job = name, "tick");
    }

    let now = env.now_ms;
    match execute(action, env) {
        Ok(()) => jobs.mark_run(name, now),
        Err(e) if e.is_recoverable() => {
            warn!(kind = e.as_label(), "error in {name}, retrying in {}s: {e}", retry_delay_ms as f64 / 1000.0);
            env.dev.counters.inc("fail_runtime");
            jobs.reschedule_after_failure(name, now, retry_delay_ms);
        }
        Err(e) => {
            error!(kind = e.as_label(), "failed {name}: {e}");
            env.dev.counters.inc("fail_other");
            jobs.mark_failed(name, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::Board;
    use crate::sim::{SimBus, SimRig};
    use portal_core::cfg::Config;
    use portal_core::job::{LED_BLINK, SEND_STATUS, UPDATE_TIME};

    struct Fixture {
        rig: SimRig,
        dev: Device,
        bridge: Bridge<SimBus>,
        jobs: JobTable,
    }

    impl Fixture {
        async fn connected() -> Self {
            let cfg = Config::default();
            let rig = SimRig::new("test");
            let mut bridge = Bridge::new(rig.bus.clone(), &cfg);
            bridge.connect().await.unwrap();
            let dev = rig.device();
            let jobs = JobTable::with_defaults(&cfg.jobs).unwrap();
            Self { rig, dev, bridge, jobs }
        }

        fn run(&mut self, name: &str, now_ms: u64) {
            let mut env = JobEnv { dev: &mut self.dev, bridge: &mut self.bridge, now_ms };
            run(name, &mut self.jobs, &mut env, 10_000);
        }
    }

    #[tokio::test]
    async fn status_publishes_three_topics() {
        let mut f = Fixture::connected().await;
        f.rig.sensors.set(25.0, 6400);
        f.run(SEND_STATUS, 120_000);

        assert_eq!(f.rig.bus.published_to("/pyportal/temperature"), vec!["77"]);
        assert_eq!(f.rig.bus.published_to("/pyportal/light"), vec!["100"]);
        let status = f.rig.bus.published_to("/pyportal/status");
        let v: serde_json::Value = serde_json::from_str(&status[0]).unwrap();
        assert_eq!(v["uptime_mins"], 2);
        assert_eq!(v["lux"], 6400);
        assert_eq!(f.jobs.get(SEND_STATUS).unwrap().state.last_run_ms, Some(120_000));
    }

    #[tokio::test]
    async fn sensor_fault_retries_after_short_delay() {
        let mut f = Fixture::connected().await;
        f.jobs.mark_run(UPDATE_TIME, 1_000);
        f.rig.sensors.fail_reads(1);
        f.run(SEND_STATUS, 50_000);

        assert_eq!(f.dev.counters.get("fail_runtime"), 1);
        assert!(f.rig.bus.published().is_empty());
        assert!(!f.jobs.is_due(SEND_STATUS, 59_999));
        assert!(f.jobs.is_due(SEND_STATUS, 60_000));
        assert_eq!(f.jobs.get(UPDATE_TIME).unwrap().state.last_run_ms, Some(1_000));
    }

    #[tokio::test]
    async fn publish_fault_waits_for_full_period() {
        let mut f = Fixture::connected().await;
        f.bridge.disconnect().await.unwrap();
        f.run(SEND_STATUS, 50_000);

        assert_eq!(f.dev.counters.get("fail_other"), 1);
        assert_eq!(f.dev.counters.get("fail_runtime"), 0);
        assert!(!f.jobs.is_due(SEND_STATUS, 60_000));
        assert!(f.jobs.is_due(SEND_STATUS, 650_000));
    }

    #[tokio::test]
    async fn blink_toggles_led() {
        let mut f = Fixture::connected().await;
        f.run(LED_BLINK, 0);
        assert!(f.rig.board.led());
        f.run(LED_BLINK, 60_000);
        assert!(!f.rig.board.led());
    }

    #[tokio::test]
    async fn missing_job_is_a_no_op() {
        let mut f = Fixture::connected().await;
        f.jobs.remove(LED_BLINK);
        f.run(LED_BLINK, 0);
        assert!(!f.rig.board.led());
        assert!(f.jobs.get(LED_BLINK).is_none());
    }

    #[tokio::test]
    async fn clock_redraw_updates_display_text() {
        let mut f = Fixture::connected().await;
        f.run(UPDATE_TIME, 0);
        assert!(f.rig.display.clock().ends_with("am") || f.rig.display.clock().ends_with("pm"));
        assert!(!f.rig.display.calendar().is_empty());
    }
}
