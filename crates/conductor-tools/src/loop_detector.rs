//! Loop Detector (C2): flags a model stuck repeating the same tool call.

use std::collections::VecDeque;

use serde_json::Value;

/// Default number of identical consecutive calls that triggers a detection.
pub const DEFAULT_THRESHOLD: usize = 5;

/// Characters of a response kept for comparison and preview purposes.
const RESPONSE_PREVIEW_CHARS: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Observation {
    tool: String,
    args: String,
    response: String,
}

/// Outcome of observing one more `(tool, args, response)` tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    /// No loop detected yet.
    Clear,
    /// The last `threshold` observations were all identical.
    Detected {
        /// How many times the observation has repeated, in total history.
        repetitions: usize,
        /// Truncated previews of the repeated call, for the correction message.
        previews: (String, String),
        /// The message appended to the conversation instructing the model to
        /// change strategy.
        correction_message: String,
    },
}

/// Tracks the last `threshold + 1` tool observations and signals repetition.
pub struct LoopDetector {
    threshold: usize,
    history: VecDeque<Observation>,
}

impl LoopDetector {
    /// Build a detector with the default threshold (5).
    #[must_use]
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_THRESHOLD)
    }

    /// Build a detector with an explicit threshold.
    #[must_use]
    pub fn with_threshold(threshold: usize) -> Self {
        Self {
            threshold,
            history: VecDeque::with_capacity(threshold + 1),
        }
    }

    /// Record one more tool observation and check for a repeated run.
    ///
    /// History is **not** cleared on detection: a subsequent identical
    /// observation re-fires (loop-detection monotonicity).
    pub fn observe(&mut self, tool: &str, args: &Value, response: &str) -> Detection {
        let normalized_args = normalize_args(args);
        let normalized_response = crate::truncate_at_char_boundary(response, RESPONSE_PREVIEW_CHARS);

        let observation = Observation {
            tool: tool.to_string(),
            args: normalized_args,
            response: normalized_response,
        };

        self.history.push_back(observation.clone());
        while self.history.len() > self.threshold + 1 {
            self.history.pop_front();
        }

        if self.history.len() < self.threshold {
            return Detection::Clear;
        }

        let tail: Vec<&Observation> = self.history.iter().rev().take(self.threshold).collect();
        let all_equal = tail.windows(2).all(|w| w[0] == w[1]);
        if !all_equal {
            return Detection::Clear;
        }

        let repetitions = self.history.iter().rev().take_while(|o| **o == observation).count();
        let correction_message = format!(
            "You have called `{tool}` with the same arguments {repetitions} times in a row and \
             received the same result each time. Stop repeating this call — either use the \
             information you already have, or change your approach.",
        );
        Detection::Detected {
            repetitions,
            previews: (observation.args.clone(), observation.response.clone()),
            correction_message,
        }
    }
}

impl Default for LoopDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Reserialize `args` so that key ordering cannot defeat equality comparison.
fn normalize_args(args: &Value) -> String {
    serde_json::to_string(args).unwrap_or_default()
}
