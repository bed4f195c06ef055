use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::{Distribution, Exp};
use tailslo_common::{Result, TailSloError};

/// Steady-rate arrivals: exponential inter-arrival gaps with mean `1 / qps`.
#[derive(Debug, Clone, PartialEq)]
pub struct PoissonWorkload {
    pub qps: f64,
    pub duration_s: f64,
    pub seed: u64,
}

impl PoissonWorkload {
    /// Send offsets in seconds from t=0, ascending, all within `[0, duration_s]`.
    /// Returns an empty schedule when `qps <= 0`.
    pub fn schedule(&self) -> Result<Vec<f64>> {
        check_rate("qps", self.qps)?;
        check_duration("duration", self.duration_s)?;

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut times = Vec::new();
        arrivals(&mut rng, self.qps, self.duration_s, 0.0, WindowEnd::Inclusive, &mut times);
        Ok(times)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseKind {
    On,
    Off,
}

/// One ON or OFF window of a burst workload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Phase {
    pub kind: PhaseKind,
    pub start_s: f64,
    pub len_s: f64,
    pub qps: f64,
}

/// Alternating ON/OFF windows, each with its own steady arrival rate.
#[derive(Debug, Clone, PartialEq)]
pub struct BurstWorkload {
    pub qps_on: f64,
    pub qps_off: f64,
    pub on_s: f64,
    pub off_s: f64,
    pub cycles: u32,
    pub seed: u64,
}

impl BurstWorkload {
    /// Nominal length of the whole run.
    pub fn duration_s(&self) -> f64 {
        self.cycles as f64 * (self.on_s + self.off_s)
    }

    /// The ON/OFF windows in time order: `2 * cycles` entries.
    pub fn phases(&self) -> Vec<Phase> {
        let mut phases = Vec::with_capacity(2 * self.cycles as usize);
        let mut t0 = 0.0;
        for _ in 0..self.cycles {
            phases.push(Phase { kind: PhaseKind::On, start_s: t0, len_s: self.on_s, qps: self.qps_on });
            t0 += self.on_s;
            phases.push(Phase { kind: PhaseKind::Off, start_s: t0, len_s: self.off_s, qps: self.qps_off });
            t0 += self.off_s;
        }
        phases
    }

    /// Send offsets across all phases, sorted ascending.
    ///
    /// Each phase keeps arrivals strictly before its end, so a window boundary
    /// belongs to the window that starts there.
    pub fn schedule(&self) -> Result<Vec<f64>> {
        check_rate("qps_on", self.qps_on)?;
        check_rate("qps_off", self.qps_off)?;
        check_duration("on_s", self.on_s)?;
        check_duration("off_s", self.off_s)?;

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut times = Vec::new();
        for phase in self.phases() {
            arrivals(&mut rng, phase.qps, phase.len_s, phase.start_s, WindowEnd::Exclusive, &mut times);
        }
        times.sort_by(f64::total_cmp);
        Ok(times)
    }
}

/// Arrival model selected for a run.
#[derive(Debug, Clone, PartialEq)]
pub enum Workload {
    Poisson(PoissonWorkload),
    Burst(BurstWorkload),
}

impl Workload {
    pub fn schedule(&self) -> Result<Vec<f64>> {
        match self {
            Workload::Poisson(w) => w.schedule(),
            Workload::Burst(w) => w.schedule(),
        }
    }

    pub fn duration_s(&self) -> f64 {
        match self {
            Workload::Poisson(w) => w.duration_s,
            Workload::Burst(w) => w.duration_s(),
        }
    }

    pub fn is_burst(&self) -> bool {
        matches!(self, Workload::Burst(_))
    }

    /// File-name tag identifying the workload parameters.
    pub fn tag(&self) -> String {
        match self {
            Workload::Poisson(w) => format!("poisson_qps{:?}_dur{}", w.qps, w.duration_s as i64),
            Workload::Burst(w) => format!(
                "burst_on{:?}x{}_off{:?}x{}_cy{}",
                w.qps_on, w.on_s as i64, w.qps_off, w.off_s as i64, w.cycles
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WindowEnd {
    Inclusive,
    Exclusive,
}

/// Append `origin + t` for each arrival time `t` of a Poisson process that lands inside
/// a window of `window_s` seconds. Stops at the first arrival past the window.
fn arrivals(rng: &mut impl Rng, qps: f64, window_s: f64, origin: f64, end: WindowEnd, out: &mut Vec<f64>) {
    if qps <= 0.0 {
        return;
    }
    let Ok(gap) = Exp::new(qps) else {
        return;
    };
    let mut t = 0.0;
    loop {
        t += gap.sample(rng);
        let inside = match end {
            WindowEnd::Inclusive => t <= window_s,
            WindowEnd::Exclusive => t < window_s,
        };
        if !inside {
            break;
        }
        out.push(origin + t);
    }
}

fn check_rate(name: &str, qps: f64) -> Result<()> {
    if !qps.is_finite() {
        return Err(TailSloError::InvalidSchedule(format!("{name} must be finite, got {qps}")));
    }
    Ok(())
}

fn check_duration(name: &str, seconds: f64) -> Result<()> {
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(TailSloError::InvalidSchedule(format!(
            "{name} must be a non-negative number of seconds, got {seconds}"
        )));
    }
    Ok(())
}
