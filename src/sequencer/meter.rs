// Meter - beats, subdivisions and the accent pattern across them

use std::fmt;

/// Click intensity of a position in the meter grid
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize,
)]
pub enum Accent {
    #[default]
    Off,
    Weak,
    Mid,
    Strong,
}

impl Accent {
    /// The audible accents, in the order the sound library stores them
    pub const AUDIBLE: [Accent; 3] = [Accent::Weak, Accent::Mid, Accent::Strong];

    pub fn is_audible(self) -> bool {
        self != Accent::Off
    }
}

/// Meter of the metronome
///
/// Holds `beats * division` accents; accent `i` sits at beat position
/// `i / division`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(from = "MeterRepr")]
pub struct Meter {
    division: usize,
    beats: usize,
    accents: Vec<Accent>,
}

/// Serialized form of a meter, fitted to the grid on load
#[derive(serde::Deserialize)]
struct MeterRepr {
    division: usize,
    beats: usize,
    #[serde(default)]
    accents: Vec<Accent>,
}

impl From<MeterRepr> for Meter {
    fn from(repr: MeterRepr) -> Self {
        Meter::with_accents(repr.beats, repr.division, repr.accents)
    }
}

impl Meter {
    /// Creates a meter with the default pattern: a strong first beat,
    /// mid accents on the other beats and silent subdivisions
    pub fn new(beats: usize, division: usize) -> Self {
        let beats = beats.max(1);
        let division = division.max(1);
        let mut accents = vec![Accent::Off; beats * division];
        for beat in 0..beats {
            accents[beat * division] = if beat == 0 {
                Accent::Strong
            } else {
                Accent::Mid
            };
        }
        Self {
            division,
            beats,
            accents,
        }
    }

    /// Creates a meter with an explicit accent pattern
    ///
    /// The pattern is truncated or padded with `Off` to fit the grid.
    pub fn with_accents(beats: usize, division: usize, accents: Vec<Accent>) -> Self {
        let beats = beats.max(1);
        let division = division.max(1);
        let mut accents = accents;
        accents.resize(beats * division, Accent::Off);
        Self {
            division,
            beats,
            accents,
        }
    }

    pub fn beats(&self) -> usize {
        self.beats
    }

    pub fn division(&self) -> usize {
        self.division
    }

    pub fn accents(&self) -> &[Accent] {
        &self.accents
    }

    /// Number of grid positions (`beats * division`)
    pub fn accent_count(&self) -> usize {
        self.accents.len()
    }

    /// Beat position of accent `index`
    pub fn accent_position(&self, index: usize) -> f64 {
        index as f64 / self.division as f64
    }

    /// Accent at `(beat, subdivision)`
    pub fn accent(&self, beat: usize, subdivision: usize) -> Option<Accent> {
        if subdivision >= self.division {
            return None;
        }
        self.accents.get(beat * self.division + subdivision).copied()
    }

    pub fn set_accent(&mut self, index: usize, accent: Accent) {
        if let Some(slot) = self.accents.get_mut(index) {
            *slot = accent;
        }
    }

    /// Changes the number of beats
    ///
    /// Patterns of retained beats are kept; new beats get a mid accent on
    /// their first subdivision.
    pub fn set_beats(&mut self, beats: usize) {
        let beats = beats.max(1);
        if beats == self.beats {
            return;
        }
        let old_beats = self.beats;
        self.accents.resize(beats * self.division, Accent::Off);
        for beat in old_beats..beats {
            self.accents[beat * self.division] = Accent::Mid;
        }
        self.beats = beats;
    }

    /// Changes the number of subdivisions per beat
    ///
    /// Every beat keeps the accents of its retained subdivisions; new
    /// subdivisions are silent.
    pub fn set_division(&mut self, division: usize) {
        let division = division.max(1);
        if division == self.division {
            return;
        }
        let keep = division.min(self.division);
        let mut accents = vec![Accent::Off; self.beats * division];
        for beat in 0..self.beats {
            for sub in 0..keep {
                accents[beat * division + sub] = self.accents[beat * self.division + sub];
            }
        }
        self.accents = accents;
        self.division = division;
    }

    /// Whether any accent of the meter is audible
    pub fn has_audible_accents(&self) -> bool {
        self.accents.iter().any(|a| a.is_audible())
    }
}

impl Default for Meter {
    fn default() -> Self {
        Self::new(4, 1)
    }
}

impl fmt::Display for Meter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.beats, self.division)
    }
}
