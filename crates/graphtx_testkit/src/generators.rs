//! Property-based test generators using proptest.
//!
//! Provides strategies for property values and for scripts of property
//! operations, plus [`SlotOutcome`], the net change a script should collapse
//! to.

use graphtx_core::PropertyValue;
use proptest::prelude::*;

/// Strategy for property keys drawn from a small alphabet, so scripts revisit
/// the same keys often.
pub fn property_key_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["name", "age", "score", "tags"]).prop_map(|key| key.to_string())
}

/// Strategy for scalar property values. Floats are finite.
pub fn scalar_value_strategy() -> impl Strategy<Value = PropertyValue> {
    prop_oneof![
        Just(PropertyValue::Null),
        any::<bool>().prop_map(PropertyValue::Bool),
        (-5i64..5).prop_map(PropertyValue::Integer),
        (-1.0e6f64..1.0e6).prop_map(PropertyValue::Float),
        "[a-c]{0,3}".prop_map(PropertyValue::Text),
        prop::collection::vec(any::<u8>(), 0..4).prop_map(PropertyValue::Bytes),
    ]
}

/// Strategy for property values, including nested arrays.
pub fn property_value_strategy() -> impl Strategy<Value = PropertyValue> {
    scalar_value_strategy().prop_recursive(2, 8, 3, |inner| {
        prop::collection::vec(inner, 0..3).prop_map(PropertyValue::Array)
    })
}

/// One mutation of a single property slot.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotOperation {
    /// Assign a value.
    Set(PropertyValue),
    /// Remove the property.
    Remove,
}

/// Strategy for a single slot operation. Values come from a small domain so
/// scripts often return to their starting value.
pub fn slot_operation_strategy() -> impl Strategy<Value = SlotOperation> {
    prop_oneof![
        3 => (0i64..3).prop_map(|v| SlotOperation::Set(PropertyValue::Integer(v))),
        1 => Just(SlotOperation::Remove),
    ]
}

/// Strategy for a script of up to `max_len` slot operations.
pub fn slot_script_strategy(max_len: usize) -> impl Strategy<Value = Vec<SlotOperation>> {
    prop::collection::vec(slot_operation_strategy(), 0..=max_len)
}

/// Strategy for a slot's committed value before the script runs.
pub fn initial_slot_strategy() -> impl Strategy<Value = Option<PropertyValue>> {
    prop::option::of((0i64..3).prop_map(PropertyValue::Integer))
}

/// Net change of one property slot.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotOutcome {
    /// No record.
    Unchanged,
    /// One assignment record.
    Assigned {
        /// End value.
        value: PropertyValue,
        /// Start value.
        previous: Option<PropertyValue>,
    },
    /// One removal record.
    Removed {
        /// Start value.
        previous: PropertyValue,
    },
}

impl SlotOutcome {
    /// Predicts the outcome of applying `script` to a slot starting at
    /// `initial`, looking only at the start and end values.
    pub fn predict(initial: Option<&PropertyValue>, script: &[SlotOperation]) -> Self {
        let end = script.iter().fold(initial.cloned(), |_current, op| match op {
            SlotOperation::Set(value) => Some(value.clone()),
            SlotOperation::Remove => None,
        });
        match (initial, end) {
            (None, None) => Self::Unchanged,
            (Some(previous), None) => Self::Removed {
                previous: previous.clone(),
            },
            (previous, Some(value)) if previous == Some(&value) => Self::Unchanged,
            (previous, Some(value)) => Self::Assigned {
                value,
                previous: previous.cloned(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(v: i64) -> SlotOperation {
        SlotOperation::Set(PropertyValue::Integer(v))
    }

    #[test]
    fn predict_last_write_wins() {
        let outcome = SlotOutcome::predict(None, &[set(1), set(2), set(3)]);
        assert_eq!(
            outcome,
            SlotOutcome::Assigned {
                value: PropertyValue::Integer(3),
                previous: None
            }
        );
    }

    #[test]
    fn predict_restored_value_is_unchanged() {
        let start = PropertyValue::Integer(1);
        let outcome = SlotOutcome::predict(Some(&start), &[SlotOperation::Remove, set(1)]);
        assert_eq!(outcome, SlotOutcome::Unchanged);
    }

    #[test]
    fn predict_removal() {
        let start = PropertyValue::Integer(1);
        let outcome = SlotOutcome::predict(Some(&start), &[set(2), SlotOperation::Remove]);
        assert_eq!(outcome, SlotOutcome::Removed { previous: start });
    }

    proptest! {
        #[test]
        fn values_are_self_equal(value in property_value_strategy()) {
            prop_assert_eq!(value.clone(), value);
        }
    }
}
