//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

use std::cell::Cell;
use std::fmt::Error;
use std::fmt::Formatter;
use std::time::Instant;

use log::info;

/// A scoped timer that reports through the `log` facade
///
/// Output looks like
/// `[secure_id3 | node stats size: 4] elapsed: 0.01250 sec [qps: 320]`
///
/// # Example
///
/// ```
/// use common::timer;
/// {
///     let _t = timer::Builder::new()
///         .label("secure_id3")
///         .extra_label("node stats")
///         .size(4)
///         .build();
///     // work
/// } // logs on drop
/// ```
pub struct Timer {
    start: Cell<Instant>,
    label: String,
    extra_label: Option<String>,
    size: Option<usize>,
    silent: bool,
}

/// Imports are expected as `use common::timer;` so that call sites read
/// `timer::Builder::new()`
pub struct Builder {
    label: String,
    extra_label: Option<String>,
    size: Option<usize>,
    silent: bool,
}

impl Builder {
    pub fn new() -> Builder {
        Builder {
            label: String::new(),
            extra_label: None,
            size: None,
            silent: false,
        }
    }

    pub fn label(&mut self, label: &str) -> &mut Builder {
        self.label = String::from(label);
        self
    }

    pub fn extra_label(&mut self, extra_label: &str) -> &mut Builder {
        self.extra_label = Some(String::from(extra_label));
        self
    }

    pub fn size(&mut self, size: usize) -> &mut Builder {
        self.size = Some(size);
        self
    }

    pub fn silent(&mut self, silent: bool) -> &mut Builder {
        self.silent = silent;
        self
    }

    pub fn build(&self) -> Timer {
        Timer {
            start: Cell::new(Instant::now()),
            label: self.label.clone(),
            extra_label: self.extra_label.clone(),
            size: self.size,
            silent: self.silent,
        }
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer {
    pub fn new(label: &str) -> Timer {
        Builder::new().label(label).build()
    }

    /// Does not report on drop, only on explicit `qps` / `elapsed_log` calls
    pub fn new_silent(label: &str) -> Timer {
        Builder::new().label(label).silent(true).build()
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.get().elapsed().as_secs_f64()
    }

    pub fn reset(&self) {
        self.start.set(Instant::now());
    }

    /// Formats the elapsed time since the last report and restarts the clock
    pub fn qps_str(&self, label: Option<&str>, size: Option<usize>) -> String {
        let e = self.elapsed_secs();
        let fixed_label = label.map(|x| format!(" | {}", x)).unwrap_or_default();
        let fixed_size = size.map(|x| format!(" size: {}", x)).unwrap_or_default();
        let fixed_qps = match size {
            Some(x) if e > 0.0 => format!(" [qps: {:.0}]", (x as f64) / e),
            _ => String::new(),
        };
        self.reset();
        format!(
            "[{}{}{}] elapsed: {:.5} sec{}",
            self.label, fixed_label, fixed_size, e, fixed_qps
        )
    }

    pub fn elapsed_log(&self, label: Option<&str>) {
        info!("{}", self.qps_str(label, None))
    }

    pub fn qps(&self, label: &str, size: usize) {
        info!("{}", self.qps_str(Some(label), Some(size)));
    }
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "timer, label: {}", self.label)
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if !self.silent {
            info!("{}", self.qps_str(self.extra_label.as_deref(), self.size));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_formats_labels_and_size() {
        let timer = Timer::new_silent("secure_id3");
        let s = timer.qps_str(Some("stats"), Some(10));
        assert!(s.starts_with("[secure_id3 | stats size: 10] elapsed:"));
    }

    #[test]
    fn timer_without_size_has_no_qps() {
        let timer = Timer::new_silent("compare");
        let s = timer.qps_str(None, None);
        assert!(s.starts_with("[compare] elapsed:"));
        assert!(!s.contains("qps"));
    }

    #[test]
    fn builder_sets_fields() {
        let t = Builder::default()
            .label("foo")
            .silent(true)
            .extra_label("bar")
            .size(199)
            .build();
        assert!(t.silent);
        assert_eq!(t.size, Some(199));
        assert_eq!(t.extra_label.as_deref(), Some("bar"));
    }

    #[test]
    fn reset_restarts_clock() {
        let _ = env_logger::builder().is_test(true).try_init();
        let t = Builder::new().label("reset").build();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(t.elapsed_secs() > 0.0);
        t.qps("rounds", 3);
        assert!(t.elapsed_secs() < 5.0);
        t.elapsed_log(Some("done"));
    }
}
