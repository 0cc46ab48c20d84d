//! Alt-tab prevention.
//!
//! This is a deterrent, not a lock. An application cannot stop the window
//! manager from switching windows. What it can do is swallow the chords it
//! receives while focused, so a reflexive Alt+Tab inside the exam window
//! does nothing. The front-end consults `AltTabFilter` for every key event.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChordKey {
    Tab,
    Escape,
    F4,
    Char(char),
    Other,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChordModifiers {
    pub alt: bool,
    pub ctrl: bool,
    pub shift: bool,
    /// Super / Command / Windows key
    pub meta: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyChord {
    pub key: ChordKey,
    pub modifiers: ChordModifiers,
}

impl KeyChord {
    pub fn new(key: ChordKey, modifiers: ChordModifiers) -> Self {
        Self { key, modifiers }
    }

    /// Chords that switch, hide or close windows on common desktops.
    pub fn is_window_switch(&self) -> bool {
        let m = self.modifiers;
        match self.key {
            ChordKey::Tab => m.alt || m.meta,
            ChordKey::Escape => m.alt || m.ctrl,
            ChordKey::F4 => m.alt,
            ChordKey::Char(c) => m.meta && matches!(c.to_ascii_lowercase(), 'd' | 'h' | 'm' | 'q' | 'w'),
            ChordKey::Other => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AltTabFilter {
    enabled: bool,
}

impl AltTabFilter {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// True if the front-end should drop this chord.
    pub fn should_swallow(&self, chord: &KeyChord) -> bool {
        self.enabled && chord.is_window_switch()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chord(key: ChordKey, alt: bool, ctrl: bool, meta: bool) -> KeyChord {
        KeyChord::new(
            key,
            ChordModifiers {
                alt,
                ctrl,
                shift: false,
                meta,
            },
        )
    }

    #[test]
    fn test_switch_chords() {
        assert!(chord(ChordKey::Tab, true, false, false).is_window_switch());
        assert!(chord(ChordKey::Tab, false, false, true).is_window_switch());
        assert!(chord(ChordKey::F4, true, false, false).is_window_switch());
        assert!(chord(ChordKey::Escape, false, true, false).is_window_switch());
        assert!(chord(ChordKey::Char('Q'), false, false, true).is_window_switch());
        assert!(!chord(ChordKey::Tab, false, false, false).is_window_switch());
        assert!(!chord(ChordKey::Char('q'), false, false, false).is_window_switch());
        assert!(!chord(ChordKey::Other, true, true, true).is_window_switch());
    }

    #[test]
    fn test_filter_only_when_enabled() {
        let alt_tab = chord(ChordKey::Tab, true, false, false);
        let mut filter = AltTabFilter::default();
        assert!(!filter.should_swallow(&alt_tab));
        filter.set_enabled(true);
        assert!(filter.should_swallow(&alt_tab));
        assert!(!filter.should_swallow(&chord(ChordKey::Char('a'), false, false, false)));
    }
}
