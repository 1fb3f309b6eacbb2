//! In-memory recorder for asserting on emitted counters

use metrics::{
    Counter, CounterFn, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit,
};
use std::future::Future;
use std::sync::{Arc, Mutex};

/// Collects every counter increment, rendered as `name{key=value,...}`
#[derive(Default)]
pub(crate) struct CounterLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl CounterLog {
    /// Total increments recorded for `rendered`
    pub(crate) fn count(&self, rendered: &str) -> usize {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| *e == rendered)
            .count()
    }
}

struct Entry {
    rendered: String,
    entries: Arc<Mutex<Vec<String>>>,
}

impl CounterFn for Entry {
    fn increment(&self, value: u64) {
        let mut entries = self.entries.lock().unwrap();
        for _ in 0..value {
            entries.push(self.rendered.clone());
        }
    }

    fn absolute(&self, _value: u64) {}
}

impl Recorder for CounterLog {
    fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
    fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
    fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

    fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
        Counter::from_arc(Arc::new(Entry {
            rendered: render(key),
            entries: self.entries.clone(),
        }))
    }

    fn register_gauge(&self, _: &Key, _: &Metadata<'_>) -> Gauge {
        Gauge::noop()
    }

    fn register_histogram(&self, _: &Key, _: &Metadata<'_>) -> Histogram {
        Histogram::noop()
    }
}

fn render(key: &Key) -> String {
    let labels: Vec<String> = key
        .labels()
        .map(|l| format!("{}={}", l.key(), l.value()))
        .collect();
    format!("{}{{{}}}", key.name(), labels.join(","))
}

/// Run `fut` on a current-thread runtime with `log` as the thread's recorder
pub(crate) fn record<F: Future>(log: &CounterLog, fut: F) -> F::Output {
    metrics::with_local_recorder(log, || {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(fut)
    })
}
