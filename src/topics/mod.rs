//! Keyword-based topic buckets for the topic layout.
//!
//! A title is scored against each bucket's keyword list; the bucket with the
//! most distinct keyword hits wins, earlier buckets winning ties. Titles with
//! no hits land in [`OTHER_TOPIC`].

/// Bucket for titles that match nothing.
pub const OTHER_TOPIC: &str = "Other";

/// Buckets and the keywords that vote for them, in tie-break order.
pub const TOPIC_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "Accelerator_Technology",
        &[
            "accelerator",
            "magnet",
            "cavity",
            "rf",
            "superconducting",
            "cryogenic",
            "vacuum",
            "mechanical",
            "power supply",
        ],
    ),
    (
        "Beam_Dynamics",
        &[
            "beam dynamics",
            "optics",
            "emittance",
            "tune",
            "chromaticity",
            "coupling",
            "lattice",
            "tracking",
            "simulation",
        ],
    ),
    (
        "Beam_Instrumentation",
        &[
            "bpm",
            "beam position monitor",
            "diagnostics",
            "monitor",
            "measurement",
            "instrumentation",
            "profile",
            "current",
        ],
    ),
    (
        "Controls",
        &[
            "control",
            "epics",
            "software",
            "database",
            "automation",
            "interface",
            "timing",
            "synchronization",
        ],
    ),
    (
        "Power_Systems",
        &[
            "power supply",
            "converter",
            "modulator",
            "high voltage",
            "switching",
            "regulation",
            "protection",
        ],
    ),
    (
        "RF_Technology",
        &[
            "rf",
            "microwave",
            "klystron",
            "magnetron",
            "waveguide",
            "coupler",
            "antenna",
            "frequency",
        ],
    ),
];

/// Picks the topic bucket for a paper title.
///
/// Keywords match whole words, so `rf` does not fire on "performance".
///
/// ```
/// use jacow_core::topics::classify_topic;
///
/// assert_eq!(classify_topic("Emittance growth in the booster lattice"), "Beam_Dynamics");
/// assert_eq!(classify_topic("Welcome address"), "Other");
/// ```
#[must_use]
pub fn classify_topic(title: &str) -> &'static str {
    let normalized = normalize(title);

    let mut best = OTHER_TOPIC;
    let mut best_score = 0;
    for &(topic, keywords) in TOPIC_KEYWORDS {
        let score = keywords
            .iter()
            .filter(|keyword| normalized.contains(&format!(" {keyword} ")))
            .count();
        if score > best_score {
            best = topic;
            best_score = score;
        }
    }
    best
}

/// Lower-cases and reduces the text to single-space separated words, padded
/// with a space on each side for whole-word matching.
fn normalize(text: &str) -> String {
    let words: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .collect();
    format!(" {} ", words.join(" "))
}
