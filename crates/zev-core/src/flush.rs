//! Adaptive flush scheduling for streamed text.
//!
//! Fragments arriving from the decoder are buffered per channel and handed
//! to the UI in batches. Prose is batched coarsely; once a buffer holds
//! something that looks structured (a code fence or markup) the threshold
//! drops so highlighting can keep up.

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::{Duration, Instant};

use futures_util::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::stream::{Channel, Fragment};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushPolicy {
    pub small_threshold: usize,
    pub large_threshold: usize,
    pub max_interval: Duration,
    pub min_interval: Duration,
    pub burst_fragments: usize,
    pub markers: Vec<String>,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            small_threshold: 10,
            large_threshold: 100,
            max_interval: Duration::from_millis(100),
            min_interval: Duration::from_millis(30),
            burst_fragments: 5,
            markers: vec!["```".to_string(), "<".to_string()],
        }
    }
}

/// A batch of text released by the scheduler. Each channel is independent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flushed {
    pub content: Option<String>,
    pub reasoning: Option<String>,
}

impl Flushed {
    pub fn is_empty(&self) -> bool {
        self.content.is_none() && self.reasoning.is_none()
    }
}

/// Per-request buffering state.
#[derive(Debug)]
pub struct FlushScheduler {
    policy: FlushPolicy,
    content: String,
    reasoning: String,
    last_flush: Instant,
    fragments: usize,
}

impl FlushScheduler {
    pub fn new(policy: FlushPolicy, now: Instant) -> Self {
        Self {
            policy,
            content: String::new(),
            reasoning: String::new(),
            last_flush: now,
            fragments: 0,
        }
    }

    /// Absorb one fragment and flush if any trigger fires.
    pub fn push(&mut self, fragment: Fragment, now: Instant) -> Option<Flushed> {
        match fragment.channel {
            Channel::Content => self.content.push_str(&fragment.text),
            Channel::Reasoning => self.reasoning.push_str(&fragment.text),
        }
        self.fragments += 1;

        if self.should_flush(now) {
            self.flush_at(now)
        } else {
            None
        }
    }

    /// Unconditionally release whatever is buffered.
    pub fn finish(&mut self) -> Option<Flushed> {
        let now = Instant::now();
        self.flush_at(now)
    }

    pub fn threshold(&self) -> usize {
        let structured = self
            .policy
            .markers
            .iter()
            .any(|m| self.content.contains(m.as_str()) || self.reasoning.contains(m.as_str()));
        if structured {
            self.policy.small_threshold
        } else {
            self.policy.large_threshold
        }
    }

    pub fn buffered(&self) -> (&str, &str) {
        (&self.content, &self.reasoning)
    }

    fn should_flush(&self, now: Instant) -> bool {
        let threshold = self.threshold();
        let elapsed = now.saturating_duration_since(self.last_flush);

        self.content.chars().count() >= threshold
            || self.reasoning.chars().count() >= threshold
            || elapsed > self.policy.max_interval
            || (self.fragments >= self.policy.burst_fragments
                && elapsed >= self.policy.min_interval)
    }

    fn flush_at(&mut self, now: Instant) -> Option<Flushed> {
        let batch = Flushed {
            content: take_non_empty(&mut self.content),
            reasoning: take_non_empty(&mut self.reasoning),
        };
        self.fragments = 0;
        self.last_flush = now;

        if batch.is_empty() {
            None
        } else {
            Some(batch)
        }
    }
}

fn take_non_empty(buffer: &mut String) -> Option<String> {
    if buffer.is_empty() {
        None
    } else {
        Some(std::mem::take(buffer))
    }
}

struct BatchState<S, E> {
    inner: Pin<Box<S>>,
    scheduler: FlushScheduler,
    pending: VecDeque<Result<Flushed, E>>,
    finished: bool,
}

/// Turn a fragment stream into a stream of flushed batches.
///
/// Buffered text is released before a transport error is passed through,
/// and once more when the source ends.
pub fn batch<S, E>(fragments: S, policy: FlushPolicy) -> impl Stream<Item = Result<Flushed, E>>
where
    S: Stream<Item = Result<Fragment, E>>,
{
    let state = BatchState {
        inner: Box::pin(fragments),
        scheduler: FlushScheduler::new(policy, Instant::now()),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.inner.next().await {
                Some(Ok(fragment)) => {
                    if let Some(batch) = state.scheduler.push(fragment, Instant::now()) {
                        state.pending.push_back(Ok(batch));
                    }
                }
                Some(Err(err)) => {
                    if let Some(batch) = state.scheduler.finish() {
                        state.pending.push_back(Ok(batch));
                    }
                    state.pending.push_back(Err(err));
                    state.finished = true;
                }
                None => {
                    if let Some(batch) = state.scheduler.finish() {
                        state.pending.push_back(Ok(batch));
                    }
                    state.finished = true;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(text: &str) -> Fragment {
        Fragment::new(Channel::Content, text)
    }

    fn reasoning(text: &str) -> Fragment {
        Fragment::new(Channel::Reasoning, text)
    }

    /// Drive the scheduler with a frozen clock so only size triggers apply.
    fn run_frozen(policy: FlushPolicy, fragments: Vec<Fragment>) -> Vec<Flushed> {
        let start = Instant::now();
        let mut scheduler = FlushScheduler::new(policy, start);
        let mut out: Vec<Flushed> = fragments
            .into_iter()
            .filter_map(|f| scheduler.push(f, start))
            .collect();
        out.extend(scheduler.finish());
        out
    }

    fn no_burst() -> FlushPolicy {
        FlushPolicy {
            burst_fragments: usize::MAX,
            ..FlushPolicy::default()
        }
    }

    #[test]
    fn flushed_text_equals_input_per_channel() {
        let words = [
            "The ", "borrow ", "checker ", "```rust\n", "fn main() {}", "\n```", " <b>", "done",
        ];
        let mut fragments = Vec::new();
        for (i, word) in words.iter().cycle().take(200).enumerate() {
            if i % 3 == 0 {
                fragments.push(reasoning(word));
            } else {
                fragments.push(content(word));
            }
        }
        let expected_content: String = fragments
            .iter()
            .filter(|f| f.channel == Channel::Content)
            .map(|f| f.text.as_str())
            .collect();
        let expected_reasoning: String = fragments
            .iter()
            .filter(|f| f.channel == Channel::Reasoning)
            .map(|f| f.text.as_str())
            .collect();

        let batches = run_frozen(FlushPolicy::default(), fragments);
        let got_content: String = batches.iter().filter_map(|b| b.content.clone()).collect();
        let got_reasoning: String = batches.iter().filter_map(|b| b.reasoning.clone()).collect();

        assert_eq!(got_content, expected_content);
        assert_eq!(got_reasoning, expected_reasoning);
        assert!(batches.len() > 1);
    }

    #[test]
    fn single_final_flush_when_nothing_triggers() {
        let batches = run_frozen(
            no_burst(),
            vec![content("short "), reasoning("hmm"), content("answer")],
        );
        assert_eq!(
            batches,
            vec![Flushed {
                content: Some("short answer".to_string()),
                reasoning: Some("hmm".to_string()),
            }]
        );
    }

    #[test]
    fn code_fence_drops_threshold_until_cleared() {
        let start = Instant::now();
        let mut scheduler = FlushScheduler::new(no_burst(), start);

        assert_eq!(scheduler.threshold(), 100);
        assert!(scheduler.push(content("``"), start).is_none());
        assert!(scheduler.push(content("`"), start).is_none());
        assert_eq!(scheduler.threshold(), 10);
        assert!(scheduler.push(content("py"), start).is_none());

        let batch = scheduler.push(content("\nprint"), start).unwrap();
        assert_eq!(batch.content.as_deref(), Some("```py\nprint"));
        assert_eq!(scheduler.threshold(), 100);

        // Plain prose after the flush batches coarsely again.
        assert!(scheduler.push(content("0123456789ab"), start).is_none());
    }

    #[test]
    fn markup_in_reasoning_affects_both_channels() {
        let start = Instant::now();
        let mut scheduler = FlushScheduler::new(no_burst(), start);
        assert!(scheduler.push(reasoning("<think"), start).is_none());
        let batch = scheduler.push(content("0123456789"), start).unwrap();
        assert_eq!(batch.content.as_deref(), Some("0123456789"));
        assert_eq!(batch.reasoning.as_deref(), Some("<think"));
    }

    #[test]
    fn max_interval_forces_flush() {
        let start = Instant::now();
        let mut scheduler = FlushScheduler::new(FlushPolicy::default(), start);
        assert!(scheduler.push(content("a"), start + Duration::from_millis(100)).is_none());
        let batch = scheduler
            .push(content("b"), start + Duration::from_millis(101))
            .unwrap();
        assert_eq!(batch.content.as_deref(), Some("ab"));
    }

    #[test]
    fn burst_needs_min_interval() {
        let start = Instant::now();
        let mut scheduler = FlushScheduler::new(FlushPolicy::default(), start);
        for _ in 0..4 {
            assert!(scheduler.push(content("x"), start).is_none());
        }
        // Fifth fragment, but too soon.
        assert!(scheduler.push(content("x"), start + Duration::from_millis(29)).is_none());
        let batch = scheduler
            .push(content("y"), start + Duration::from_millis(30))
            .unwrap();
        assert_eq!(batch.content.as_deref(), Some("xxxxxy"));
    }

    #[tokio::test]
    async fn batch_adapter_flushes_before_error() {
        let source = stream::iter(vec![
            Ok(content("partial ")),
            Ok(reasoning("why")),
            Err("connection reset"),
            Ok(content("never seen")),
        ]);
        let out: Vec<_> = batch(source, no_burst()).collect().await;

        assert_eq!(out.len(), 2);
        let first = out[0].as_ref().unwrap();
        assert_eq!(first.content.as_deref(), Some("partial "));
        assert_eq!(first.reasoning.as_deref(), Some("why"));
        assert_eq!(out[1], Err("connection reset"));
    }

    #[tokio::test]
    async fn batch_adapter_final_flush_on_end() {
        let source = stream::iter(vec![
            Ok::<_, ()>(content("Hello, ")),
            Ok(content("world")),
        ]);
        let out: Vec<_> = batch(source, no_burst()).collect().await;
        assert_eq!(
            out,
            vec![Ok(Flushed {
                content: Some("Hello, world".to_string()),
                reasoning: None,
            })]
        );
    }
}
