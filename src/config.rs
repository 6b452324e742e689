/// Controller configuration with tunable timing and quota thresholds.
/// Durations are milliseconds.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// One-shot delay between page load and the first evaluation attempt
    pub initial_delay_ms: u64,

    /// Re-check interval for pages judged general-purpose
    pub recheck_interval_ms: u64,

    /// Delay before the single automatic retry after a classifier failure
    pub retry_delay_ms: u64,

    /// How long an ignored tab stays exempt from evaluation
    pub ignore_duration_ms: u64,

    /// Cadence of the expired-ignore purge while a session is active
    pub ignore_sweep_interval_ms: u64,

    /// Maximum successful evaluations per session
    pub max_evals_per_session: u32,

    /// Minimum gap between evaluations of the same URL in the same tab
    pub tab_cooldown_ms: u64,

    /// Word cap for sampled page text
    pub max_sampled_words: usize,

    /// Snippets shorter than this are treated as insufficient content
    pub min_text_len: usize,

    /// A mutation only triggers an early evaluation above this text length
    pub mutation_min_text_len: usize,

    /// Word window for the content fingerprint
    pub fingerprint_words: usize,

    /// Minimum goal length accepted at session start
    pub min_goal_len: usize,

    /// Minimum user-explanation length accepted for revalidation
    pub min_explanation_len: usize,

    /// Revalidation scores at or above this dismiss the off-topic alert
    pub on_topic_threshold: u8,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 30_000,
            recheck_interval_ms: 60_000,
            retry_delay_ms: 30_000,
            ignore_duration_ms: 600_000,
            ignore_sweep_interval_ms: 60_000,
            max_evals_per_session: 10,
            tab_cooldown_ms: 60_000,
            max_sampled_words: 500,
            min_text_len: 50,
            mutation_min_text_len: 100,
            fingerprint_words: 100,
            min_goal_len: 10,
            min_explanation_len: 20,
            on_topic_threshold: 80,
        }
    }
}
