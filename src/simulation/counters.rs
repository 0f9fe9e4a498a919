use std::{
    collections::HashMap,
    fmt::Write,
    time::{Duration, Instant},
};

use crate::floating_type_mod::FT;

#[derive(Clone)]
pub struct Counter<T> {
    values: Vec<T>,
    last_start: Instant,
}

impl<T> Counter<T> {
    fn new() -> Self {
        Counter::<T> {
            last_start: Instant::now(),
            values: Vec::new(),
        }
    }

    fn add_value(&mut self, v: T) {
        self.values.push(v);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Counter<FT> {
    pub fn avg(&self) -> FT {
        if self.values.is_empty() {
            return 0.;
        }
        self.values.iter().cloned().sum::<FT>() / self.values.len() as FT
    }

    pub fn min(&self) -> FT {
        self.values.iter().cloned().fold(FT::MAX, FT::min)
    }

    pub fn max(&self) -> FT {
        self.values.iter().cloned().fold(FT::MIN, FT::max)
    }

    pub fn sum(&self) -> FT {
        self.values.iter().cloned().sum()
    }
}

impl Counter<Duration> {
    fn begin(&mut self) {
        self.last_start = Instant::now();
    }

    fn end(&mut self) {
        self.values.push(Instant::now() - self.last_start);
    }

    pub fn avg(&self) -> Duration {
        if self.values.is_empty() {
            return Duration::ZERO;
        }
        self.values.iter().cloned().sum::<Duration>() / self.values.len() as u32
    }

    pub fn sum(&self) -> Duration {
        self.values.iter().cloned().sum::<Duration>()
    }
}

/// Named value series (particle counts, regularised particles, ...).
#[derive(Clone)]
pub struct ValueCounters {
    counters: HashMap<String, Counter<FT>>,
    enabled: bool,
}

impl ValueCounters {
    pub fn new(enabled: bool) -> ValueCounters {
        ValueCounters {
            counters: HashMap::default(),
            enabled,
        }
    }

    pub fn add_value(&mut self, id: &str, v: FT) {
        if self.enabled {
            self.counters
                .entry(id.to_string())
                .or_insert_with(Counter::<FT>::new)
                .add_value(v);
        }
    }

    pub fn get(&self, id: &str) -> Option<&Counter<FT>> {
        self.counters.get(id)
    }
}

/// Named wall-clock timers, one per phase.
#[derive(Clone)]
pub struct PerformanceCounters {
    counters: HashMap<String, Counter<Duration>>,
    enabled: bool,
}

impl PerformanceCounters {
    pub fn new(enabled: bool) -> PerformanceCounters {
        PerformanceCounters {
            counters: HashMap::default(),
            enabled,
        }
    }

    pub fn begin(&mut self, id: &str) {
        if self.enabled {
            self.counters
                .entry(id.to_string())
                .or_insert_with(Counter::<Duration>::new)
                .begin();
        }
    }

    pub fn end(&mut self, id: &str) {
        if self.enabled {
            if let Some(counter) = self.counters.get_mut(id) {
                counter.end();
            }
        }
    }

    /// Times `f` under `id`.
    pub fn measure<R>(&mut self, id: &str, f: impl FnOnce() -> R) -> R {
        self.begin(id);
        let result = f();
        self.end(id);
        result
    }

    pub fn get(&self, id: &str) -> Option<&Counter<Duration>> {
        self.counters.get(id)
    }
}

/// Plain-text report of all counters, sorted by label.
pub fn write_statistics(pcounters: &PerformanceCounters, vcounters: &ValueCounters) -> String {
    let mut s = String::new();

    if let Some(step) = pcounters.get("step") {
        let _ = writeln!(s, "simulation-time: {}ms", step.sum().as_secs_f64() * 1000.);
        let _ = writeln!(s);
    }

    let mut v = pcounters.counters.iter().collect::<Vec<_>>();
    v.sort_by(|x, y| x.0.cmp(y.0));
    for (label, pcounter) in v {
        let _ = writeln!(s, "{}: avg:{}ms", label, pcounter.avg().as_secs_f64() * 1000.);
    }
    let _ = writeln!(s);

    let mut v = vcounters.counters.iter().collect::<Vec<_>>();
    v.sort_by(|x, y| x.0.cmp(y.0));
    for (label, vcounter) in v {
        let _ = writeln!(
            s,
            "{}: min:{} max:{} avg:{}",
            label,
            vcounter.min(),
            vcounter.max(),
            vcounter.avg()
        );
    }

    s
}
