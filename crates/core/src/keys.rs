//! Key Codec
//!
//! Symbolic key names, their Windows virtual-key codes, and the parsers for
//! single keys, modifier combos and `key(delay), ...` sequences.
//!
//! Raw codes are Windows virtual-key codes on every platform; hook backends
//! that see other code spaces translate into this one before dispatch.

use crate::error::{Error, ParseError};
use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::num::{IntErrorKind, ParseIntError};

/// Largest accepted per-step delay in milliseconds
pub const MAX_DELAY_MS: u32 = 10_000;

/// Keys allowed as mapping triggers
pub const TRIGGER_WHITELIST: &[KeyCode] = &[KeyCode::Delete, KeyCode::End, KeyCode::Home];

/// Grouping used when listing available keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyCategory {
    Digits,
    Letters,
    Function,
    Arrows,
    Special,
    Navigation,
    Numpad,
}

impl KeyCategory {
    pub fn label(self) -> &'static str {
        match self {
            KeyCategory::Digits => "Digits",
            KeyCategory::Letters => "Letters",
            KeyCategory::Function => "Function keys",
            KeyCategory::Arrows => "Arrow keys",
            KeyCategory::Special => "Special keys",
            KeyCategory::Navigation => "Navigation keys",
            KeyCategory::Numpad => "Numeric pad",
        }
    }
}

macro_rules! key_table {
    ($( $variant:ident => $name:literal, $vk:literal, $category:ident; )+) => {
        /// A non-modifier key
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum KeyCode {
            $($variant,)+
        }

        impl KeyCode {
            /// Every key in table order
            pub const ALL: &'static [KeyCode] = &[$(KeyCode::$variant,)+];

            /// Canonical lowercase name
            pub fn name(self) -> &'static str {
                match self {
                    $(KeyCode::$variant => $name,)+
                }
            }

            /// Windows virtual-key code
            pub fn vk(self) -> u16 {
                match self {
                    $(KeyCode::$variant => $vk,)+
                }
            }

            pub fn category(self) -> KeyCategory {
                match self {
                    $(KeyCode::$variant => KeyCategory::$category,)+
                }
            }
        }
    };
}

key_table! {
    Digit0 => "0", 0x30, Digits;
    Digit1 => "1", 0x31, Digits;
    Digit2 => "2", 0x32, Digits;
    Digit3 => "3", 0x33, Digits;
    Digit4 => "4", 0x34, Digits;
    Digit5 => "5", 0x35, Digits;
    Digit6 => "6", 0x36, Digits;
    Digit7 => "7", 0x37, Digits;
    Digit8 => "8", 0x38, Digits;
    Digit9 => "9", 0x39, Digits;
    A => "a", 0x41, Letters;
    B => "b", 0x42, Letters;
    C => "c", 0x43, Letters;
    D => "d", 0x44, Letters;
    E => "e", 0x45, Letters;
    F => "f", 0x46, Letters;
    G => "g", 0x47, Letters;
    H => "h", 0x48, Letters;
    I => "i", 0x49, Letters;
    J => "j", 0x4A, Letters;
    K => "k", 0x4B, Letters;
    L => "l", 0x4C, Letters;
    M => "m", 0x4D, Letters;
    N => "n", 0x4E, Letters;
    O => "o", 0x4F, Letters;
    P => "p", 0x50, Letters;
    Q => "q", 0x51, Letters;
    R => "r", 0x52, Letters;
    S => "s", 0x53, Letters;
    T => "t", 0x54, Letters;
    U => "u", 0x55, Letters;
    V => "v", 0x56, Letters;
    W => "w", 0x57, Letters;
    X => "x", 0x58, Letters;
    Y => "y", 0x59, Letters;
    Z => "z", 0x5A, Letters;
    F1 => "f1", 0x70, Function;
    F2 => "f2", 0x71, Function;
    F3 => "f3", 0x72, Function;
    F4 => "f4", 0x73, Function;
    F5 => "f5", 0x74, Function;
    F6 => "f6", 0x75, Function;
    F7 => "f7", 0x76, Function;
    F8 => "f8", 0x77, Function;
    F9 => "f9", 0x78, Function;
    F10 => "f10", 0x79, Function;
    F11 => "f11", 0x7A, Function;
    F12 => "f12", 0x7B, Function;
    Left => "left", 0x25, Arrows;
    Up => "up", 0x26, Arrows;
    Right => "right", 0x27, Arrows;
    Down => "down", 0x28, Arrows;
    Space => "space", 0x20, Special;
    Enter => "enter", 0x0D, Special;
    Esc => "esc", 0x1B, Special;
    Tab => "tab", 0x09, Special;
    Backspace => "backspace", 0x08, Special;
    Delete => "delete", 0x2E, Navigation;
    Home => "home", 0x24, Navigation;
    End => "end", 0x23, Navigation;
    PageUp => "pageup", 0x21, Navigation;
    PageDown => "pagedown", 0x22, Navigation;
    Insert => "insert", 0x2D, Navigation;
    Num0 => "num0", 0x60, Numpad;
    Num1 => "num1", 0x61, Numpad;
    Num2 => "num2", 0x62, Numpad;
    Num3 => "num3", 0x63, Numpad;
    Num4 => "num4", 0x64, Numpad;
    Num5 => "num5", 0x65, Numpad;
    Num6 => "num6", 0x66, Numpad;
    Num7 => "num7", 0x67, Numpad;
    Num8 => "num8", 0x68, Numpad;
    Num9 => "num9", 0x69, Numpad;
    NumMul => "nummul", 0x6A, Numpad;
    NumAdd => "numadd", 0x6B, Numpad;
    NumSub => "numsub", 0x6D, Numpad;
    NumDec => "numdec", 0x6E, Numpad;
    NumDiv => "numdiv", 0x6F, Numpad;
}

const KEY_ALIASES: &[(&str, KeyCode)] = &[
    ("escape", KeyCode::Esc),
    ("return", KeyCode::Enter),
    ("del", KeyCode::Delete),
];

static BY_NAME: Lazy<HashMap<&'static str, KeyCode>> = Lazy::new(|| {
    let mut map: HashMap<&'static str, KeyCode> =
        KeyCode::ALL.iter().map(|k| (k.name(), *k)).collect();
    map.extend(KEY_ALIASES.iter().copied());
    map
});

static BY_VK: Lazy<HashMap<u16, KeyCode>> =
    Lazy::new(|| KeyCode::ALL.iter().map(|k| (k.vk(), *k)).collect());

impl KeyCode {
    /// Look up a key by (case-insensitive) name or alias
    pub fn from_name(name: &str) -> Option<KeyCode> {
        BY_NAME.get(name.trim().to_lowercase().as_str()).copied()
    }

    /// Look up a key by Windows virtual-key code
    pub fn from_vk(vk: u16) -> Option<KeyCode> {
        BY_VK.get(&vk).copied()
    }

    pub fn is_trigger(self) -> bool {
        TRIGGER_WHITELIST.contains(&self)
    }
}

impl fmt::Display for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Modifier key; declaration order is the canonical order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Modifier {
    Ctrl,
    Shift,
    Alt,
    Cmd,
}

impl Modifier {
    pub const ALL: &'static [Modifier] = &[Modifier::Ctrl, Modifier::Shift, Modifier::Alt, Modifier::Cmd];

    pub fn name(self) -> &'static str {
        match self {
            Modifier::Ctrl => "ctrl",
            Modifier::Shift => "shift",
            Modifier::Alt => "alt",
            Modifier::Cmd => "cmd",
        }
    }

    /// Windows virtual-key code (left-hand variant for the OS key)
    pub fn vk(self) -> u16 {
        match self {
            Modifier::Ctrl => 0x11,
            Modifier::Shift => 0x10,
            Modifier::Alt => 0x12,
            Modifier::Cmd => 0x5B,
        }
    }

    pub fn from_name(name: &str) -> Option<Modifier> {
        match name.trim().to_lowercase().as_str() {
            "ctrl" | "control" => Some(Modifier::Ctrl),
            "shift" => Some(Modifier::Shift),
            "alt" | "option" => Some(Modifier::Alt),
            "cmd" | "win" | "meta" => Some(Modifier::Cmd),
            _ => None,
        }
    }
}

impl fmt::Display for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A parsed key: a single key or one main key held with modifiers
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyToken {
    Simple(KeyCode),
    Combo {
        modifiers: BTreeSet<Modifier>,
        key: KeyCode,
    },
}

impl KeyToken {
    pub fn main_key(&self) -> KeyCode {
        match self {
            KeyToken::Simple(key) => *key,
            KeyToken::Combo { key, .. } => *key,
        }
    }

    /// Modifiers in canonical order (empty for simple keys)
    pub fn modifiers(&self) -> Vec<Modifier> {
        match self {
            KeyToken::Simple(_) => Vec::new(),
            KeyToken::Combo { modifiers, .. } => modifiers.iter().copied().collect(),
        }
    }

    pub fn is_combo(&self) -> bool {
        matches!(self, KeyToken::Combo { .. })
    }
}

impl fmt::Display for KeyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyToken::Simple(key) => f.write_str(key.name()),
            KeyToken::Combo { modifiers, key } => {
                for modifier in modifiers {
                    write!(f, "{}+", modifier)?;
                }
                f.write_str(key.name())
            }
        }
    }
}

/// One output keystroke plus the pause that follows it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedStep {
    pub key: KeyToken,
    pub delay_ms: u32,
}

impl MappedStep {
    pub fn new(key: KeyToken, delay_ms: u32) -> Result<Self, ParseError> {
        if delay_ms > MAX_DELAY_MS {
            return Err(ParseError::DelayOutOfRange {
                value: i64::from(delay_ms),
                max: MAX_DELAY_MS,
            });
        }
        Ok(Self { key, delay_ms })
    }
}

/// Parse a single key or a `mod+mod+key` combo
pub fn parse_token(s: &str) -> Result<KeyToken, ParseError> {
    let text = s.trim().to_lowercase();
    if text.is_empty() {
        return Err(ParseError::BadSyntax("empty key name".into()));
    }

    if !text.contains('+') {
        if Modifier::from_name(&text).is_some() {
            return Err(ParseError::ComboNeedsMainKey(text));
        }
        return KeyCode::from_name(&text)
            .map(KeyToken::Simple)
            .ok_or(ParseError::UnknownKey(text));
    }

    let mut modifiers = BTreeSet::new();
    let mut main_keys = Vec::new();
    for segment in text.split('+').map(str::trim) {
        if segment.is_empty() {
            return Err(ParseError::BadSyntax(format!("empty segment in '{}'", text)));
        }
        if let Some(modifier) = Modifier::from_name(segment) {
            if !modifiers.insert(modifier) {
                return Err(ParseError::BadSyntax(format!(
                    "modifier '{}' repeated in '{}'",
                    modifier, text
                )));
            }
        } else if let Some(key) = KeyCode::from_name(segment) {
            main_keys.push(key);
        } else {
            return Err(ParseError::UnknownKey(segment.to_string()));
        }
    }

    if modifiers.is_empty() {
        return Err(ParseError::ComboNeedsModifier(text));
    }
    match main_keys.as_slice() {
        [] => Err(ParseError::ComboNeedsMainKey(text)),
        [key] => Ok(KeyToken::Combo {
            modifiers,
            key: *key,
        }),
        _ => Err(ParseError::BadSyntax(format!(
            "combo '{}' has more than one main key",
            text
        ))),
    }
}

/// Parse `key, key(delay), ...`; empty elements are skipped
pub fn parse_sequence(s: &str) -> Result<Vec<MappedStep>, ParseError> {
    let mut steps = Vec::new();
    for element in s.split(',').map(str::trim) {
        if element.is_empty() {
            continue;
        }
        steps.push(parse_step(element)?);
    }

    if steps.is_empty() {
        return Err(ParseError::BadSyntax("key sequence is empty".into()));
    }
    Ok(steps)
}

fn parse_step(element: &str) -> Result<MappedStep, ParseError> {
    let Some(open) = element.find('(') else {
        if element.contains(')') {
            return Err(ParseError::BadSyntax(format!("unbalanced ')' in '{}'", element)));
        }
        return Ok(MappedStep {
            key: parse_token(element)?,
            delay_ms: 0,
        });
    };

    let Some(inner) = element[open + 1..].strip_suffix(')') else {
        return Err(ParseError::BadSyntax(format!(
            "expected '<key>(<delay>)', got '{}'",
            element
        )));
    };
    let inner = inner.trim();
    let delay: i64 = inner.parse().map_err(|e: ParseIntError| match e.kind() {
        IntErrorKind::PosOverflow => ParseError::DelayOutOfRange {
            value: i64::MAX,
            max: MAX_DELAY_MS,
        },
        IntErrorKind::NegOverflow => ParseError::DelayOutOfRange {
            value: i64::MIN,
            max: MAX_DELAY_MS,
        },
        _ => ParseError::BadSyntax(format!("delay '{}' is not an integer", inner)),
    })?;
    if !(0..=i64::from(MAX_DELAY_MS)).contains(&delay) {
        return Err(ParseError::DelayOutOfRange {
            value: delay,
            max: MAX_DELAY_MS,
        });
    }

    Ok(MappedStep {
        key: parse_token(&element[..open])?,
        delay_ms: delay as u32,
    })
}

/// Canonical text form accepted back by [`parse_sequence`]
pub fn format_sequence(steps: &[MappedStep]) -> String {
    steps
        .iter()
        .map(|step| format!("{}({})", step.key, step.delay_ms))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Raw code for a whitelisted trigger token
pub fn trigger_raw_code(token: &KeyToken) -> Option<u16> {
    match token {
        KeyToken::Simple(key) if key.is_trigger() => Some(key.vk()),
        _ => None,
    }
}

/// Parse and check a trigger name against the whitelist
pub fn parse_trigger(s: &str) -> crate::Result<KeyCode> {
    let token = parse_token(s)?;
    match token {
        KeyToken::Simple(key) if key.is_trigger() => Ok(key),
        other => Err(Error::Validation(format!(
            "trigger '{}' is not allowed (expected one of: {})",
            other,
            trigger_names().join(", ")
        ))),
    }
}

pub fn trigger_names() -> Vec<&'static str> {
    TRIGGER_WHITELIST.iter().map(|k| k.name()).collect()
}

/// Key names of one category
#[derive(Debug, Clone, Serialize)]
pub struct KeyGroup {
    pub category: &'static str,
    pub label: &'static str,
    pub keys: Vec<&'static str>,
}

/// All usable key names grouped by category, modifiers last
pub fn available_keys() -> Vec<KeyGroup> {
    let mut groups: Vec<(KeyCategory, Vec<&'static str>)> = Vec::new();
    for key in KeyCode::ALL {
        let category = key.category();
        match groups.iter_mut().find(|(c, _)| *c == category) {
            Some((_, names)) => names.push(key.name()),
            None => groups.push((category, vec![key.name()])),
        }
    }

    let mut result: Vec<KeyGroup> = groups
        .into_iter()
        .map(|(category, keys)| KeyGroup {
            category: category_id(category),
            label: category.label(),
            keys,
        })
        .collect();
    result.push(KeyGroup {
        category: "modifiers",
        label: "Modifiers",
        keys: Modifier::ALL.iter().map(|m| m.name()).collect(),
    });
    result
}

fn category_id(category: KeyCategory) -> &'static str {
    match category {
        KeyCategory::Digits => "digits",
        KeyCategory::Letters => "letters",
        KeyCategory::Function => "function",
        KeyCategory::Arrows => "arrows",
        KeyCategory::Special => "special",
        KeyCategory::Navigation => "navigation",
        KeyCategory::Numpad => "numpad",
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComboExample {
    pub combo: &'static str,
    pub description: &'static str,
}

pub fn combo_examples() -> Vec<ComboExample> {
    const EXAMPLES: &[(&str, &str)] = &[
        ("ctrl+c", "Copy"),
        ("ctrl+v", "Paste"),
        ("ctrl+z", "Undo"),
        ("ctrl+shift+n", "New private window"),
        ("ctrl+shift+esc", "Task manager"),
        ("alt+tab", "Switch window"),
        ("alt+f4", "Close window"),
        ("shift+f10", "Context menu"),
        ("cmd+d", "Show desktop"),
    ];
    EXAMPLES
        .iter()
        .map(|&(combo, description)| ComboExample { combo, description })
        .collect()
}
