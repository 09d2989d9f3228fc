//! Two-way projections over the flat [`Settings`] record used by the
//! configuration controls. A pair view writes both underlying fields in one
//! call, so the persisted payload is identical to setting them one by one.

use shared::domain::{Settings, ThresholdPair};

pub struct FieldView<V> {
    name: &'static str,
    get: fn(&Settings) -> V,
    set: fn(&mut Settings, V),
}

impl<V> Clone for FieldView<V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V> Copy for FieldView<V> {}

impl<V> FieldView<V> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn read(&self, settings: &Settings) -> V {
        (self.get)(settings)
    }

    pub fn write(&self, settings: &mut Settings, value: V) {
        (self.set)(settings, value)
    }
}

pub const THRESHOLD: FieldView<ThresholdPair> = FieldView {
    name: "threshold",
    get: |s| (s.threshold_low, s.threshold_high),
    set: |s, (low, high)| {
        s.threshold_low = low;
        s.threshold_high = high;
    },
};

pub const THRESHOLD_LAST: FieldView<ThresholdPair> = FieldView {
    name: "threshold_last",
    get: |s| (s.threshold_last_low, s.threshold_last_high),
    set: |s, (low, high)| {
        s.threshold_last_low = low;
        s.threshold_last_high = high;
    },
};

pub const ISLANDING_PADDING: FieldView<i32> = FieldView {
    name: "islanding_padding",
    get: |s| s.islanding_padding,
    set: |s, v| s.islanding_padding = v,
};

pub const SEGMENTS: FieldView<u32> = FieldView {
    name: "segments",
    get: |s| s.segments,
    set: |s, v| s.segments = v,
};

pub const EXTENDED_LAST_DIGIT: FieldView<bool> = FieldView {
    name: "extended_last_digit",
    get: |s| s.extended_last_digit,
    set: |s, v| s.extended_last_digit = v,
};

pub const LAST_3_DIGITS_NARROW: FieldView<bool> = FieldView {
    name: "last_3_digits_narrow",
    get: |s| s.shrink_last_3,
    set: |s, v| s.shrink_last_3 = v,
};

pub const ROTATED_180: FieldView<bool> = FieldView {
    name: "rotated_180",
    get: |s| s.rotated_180,
    set: |s, v| s.rotated_180 = v,
};

pub const MAX_FLOW_RATE: FieldView<f64> = FieldView {
    name: "max_flow_rate",
    get: |s| s.max_flow_rate,
    set: |s, v| s.max_flow_rate = v,
};

pub const CONFIDENCE_THRESHOLD: FieldView<Option<f64>> = FieldView {
    name: "confidence_threshold",
    get: |s| s.conf_threshold,
    set: |s, v| s.conf_threshold = v,
};

#[cfg(test)]
#[path = "tests/views_tests.rs"]
mod tests;
