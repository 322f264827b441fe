use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::Page;

const TYPO_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

/// Parameters of simulated human typing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TypingProfile {
    pub char_delay_ms: (u64, u64),
    pub word_pause_probability: f64,
    pub word_pause_ms: (u64, u64),
    pub typo_probability: f64,
    pub long_pause_probability: f64,
    pub long_pause_ms: (u64, u64),
    pub finish_delay_ms: (u64, u64),
}

impl Default for TypingProfile {
    fn default() -> Self {
        Self {
            char_delay_ms: (50, 300),
            word_pause_probability: 0.2,
            word_pause_ms: (500, 2_000),
            typo_probability: 0.08,
            long_pause_probability: 0.1,
            long_pause_ms: (500, 2_500),
            finish_delay_ms: (1_000, 3_000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keystroke {
    Char(char),
    Backspace,
    Pause(Duration),
}

fn draw<R: Rng + ?Sized>(rng: &mut R, (min, max): (u64, u64)) -> Duration {
    let (low, high) = if min <= max { (min, max) } else { (max, min) };
    Duration::from_millis(rng.gen_range(low..=high))
}

fn chance<R: Rng + ?Sized>(rng: &mut R, probability: f64) -> bool {
    rng.gen_bool(probability.clamp(0.0, 1.0))
}

impl TypingProfile {
    /// Instant typing, used where timing does not matter.
    pub fn instant() -> Self {
        Self {
            char_delay_ms: (0, 0),
            word_pause_probability: 0.0,
            word_pause_ms: (0, 0),
            typo_probability: 0.0,
            long_pause_probability: 0.0,
            long_pause_ms: (0, 0),
            finish_delay_ms: (0, 0),
        }
    }

    /// Expand `text` into keystrokes. Typos are always followed by a
    /// backspace, so replaying the plan yields `text` exactly.
    pub fn plan<R: Rng + ?Sized>(&self, text: &str, rng: &mut R) -> Vec<Keystroke> {
        let mut strokes = Vec::with_capacity(text.len() * 2);

        for ch in text.chars() {
            if ch.is_alphanumeric() && chance(rng, self.typo_probability) {
                let idx = rng.gen_range(0..TYPO_ALPHABET.len());
                strokes.push(Keystroke::Char(TYPO_ALPHABET[idx] as char));
                strokes.push(Keystroke::Pause(draw(rng, self.char_delay_ms)));
                strokes.push(Keystroke::Backspace);
            }

            strokes.push(Keystroke::Char(ch));
            strokes.push(Keystroke::Pause(draw(rng, self.char_delay_ms)));

            if ch == ' ' && chance(rng, self.word_pause_probability) {
                strokes.push(Keystroke::Pause(draw(rng, self.word_pause_ms)));
            }
            if chance(rng, self.long_pause_probability) {
                strokes.push(Keystroke::Pause(draw(rng, self.long_pause_ms)));
            }
        }

        strokes.push(Keystroke::Pause(draw(rng, self.finish_delay_ms)));
        strokes
    }
}

/// Focus `selector` and type `text` into it following `profile`.
pub async fn human_type(
    page: &mut dyn Page,
    selector: &str,
    text: &str,
    profile: &TypingProfile,
) -> Result<()> {
    let strokes = {
        let mut rng = rand::thread_rng();
        profile.plan(text, &mut rng)
    };

    page.click(selector)
        .await
        .with_context(|| format!("failed to focus {selector}"))?;

    for stroke in strokes {
        match stroke {
            Keystroke::Char(ch) => page.type_char(ch).await?,
            Keystroke::Backspace => page.press_key("Backspace").await?,
            Keystroke::Pause(duration) if duration.is_zero() => {}
            Keystroke::Pause(duration) => page.pause(duration).await,
        }
    }

    Ok(())
}
