//! Key name definitions and lookups
//!
//! Maps the human-readable key names accepted in configuration files to
//! Linux input-event key codes and back. Lookups are case-insensitive and
//! ignore surrounding whitespace.

use evdev::KeyCode;

/// Names accepted for modifier keys
const MODIFIER_NAMES: &[&str] = &[
    "ctrl",
    "control",
    "leftctrl",
    "rightctrl",
    "alt",
    "leftalt",
    "rightalt",
    "shift",
    "leftshift",
    "rightshift",
    "super",
    "meta",
    "win",
    "leftmeta",
    "rightmeta",
];

/// Name to key code table.
///
/// When several names share a code, the first one listed is the canonical
/// name returned by [`code_to_name`].
const KEY_NAMES: &[(&str, KeyCode)] = &[
    // Modifiers
    ("ctrl", KeyCode::KEY_LEFTCTRL),
    ("control", KeyCode::KEY_LEFTCTRL),
    ("leftctrl", KeyCode::KEY_LEFTCTRL),
    ("rightctrl", KeyCode::KEY_RIGHTCTRL),
    ("alt", KeyCode::KEY_LEFTALT),
    ("leftalt", KeyCode::KEY_LEFTALT),
    ("rightalt", KeyCode::KEY_RIGHTALT),
    ("shift", KeyCode::KEY_LEFTSHIFT),
    ("leftshift", KeyCode::KEY_LEFTSHIFT),
    ("rightshift", KeyCode::KEY_RIGHTSHIFT),
    ("super", KeyCode::KEY_LEFTMETA),
    ("meta", KeyCode::KEY_LEFTMETA),
    ("win", KeyCode::KEY_LEFTMETA),
    ("leftmeta", KeyCode::KEY_LEFTMETA),
    ("rightmeta", KeyCode::KEY_RIGHTMETA),
    // Letters
    ("a", KeyCode::KEY_A),
    ("b", KeyCode::KEY_B),
    ("c", KeyCode::KEY_C),
    ("d", KeyCode::KEY_D),
    ("e", KeyCode::KEY_E),
    ("f", KeyCode::KEY_F),
    ("g", KeyCode::KEY_G),
    ("h", KeyCode::KEY_H),
    ("i", KeyCode::KEY_I),
    ("j", KeyCode::KEY_J),
    ("k", KeyCode::KEY_K),
    ("l", KeyCode::KEY_L),
    ("m", KeyCode::KEY_M),
    ("n", KeyCode::KEY_N),
    ("o", KeyCode::KEY_O),
    ("p", KeyCode::KEY_P),
    ("q", KeyCode::KEY_Q),
    ("r", KeyCode::KEY_R),
    ("s", KeyCode::KEY_S),
    ("t", KeyCode::KEY_T),
    ("u", KeyCode::KEY_U),
    ("v", KeyCode::KEY_V),
    ("w", KeyCode::KEY_W),
    ("x", KeyCode::KEY_X),
    ("y", KeyCode::KEY_Y),
    ("z", KeyCode::KEY_Z),
    // Numbers
    ("0", KeyCode::KEY_0),
    ("1", KeyCode::KEY_1),
    ("2", KeyCode::KEY_2),
    ("3", KeyCode::KEY_3),
    ("4", KeyCode::KEY_4),
    ("5", KeyCode::KEY_5),
    ("6", KeyCode::KEY_6),
    ("7", KeyCode::KEY_7),
    ("8", KeyCode::KEY_8),
    ("9", KeyCode::KEY_9),
    // Function keys
    ("f1", KeyCode::KEY_F1),
    ("f2", KeyCode::KEY_F2),
    ("f3", KeyCode::KEY_F3),
    ("f4", KeyCode::KEY_F4),
    ("f5", KeyCode::KEY_F5),
    ("f6", KeyCode::KEY_F6),
    ("f7", KeyCode::KEY_F7),
    ("f8", KeyCode::KEY_F8),
    ("f9", KeyCode::KEY_F9),
    ("f10", KeyCode::KEY_F10),
    ("f11", KeyCode::KEY_F11),
    ("f12", KeyCode::KEY_F12),
    // Special keys
    ("esc", KeyCode::KEY_ESC),
    ("escape", KeyCode::KEY_ESC),
    ("tab", KeyCode::KEY_TAB),
    ("space", KeyCode::KEY_SPACE),
    ("enter", KeyCode::KEY_ENTER),
    ("return", KeyCode::KEY_ENTER),
    ("backspace", KeyCode::KEY_BACKSPACE),
    ("delete", KeyCode::KEY_DELETE),
    ("insert", KeyCode::KEY_INSERT),
    ("home", KeyCode::KEY_HOME),
    ("end", KeyCode::KEY_END),
    ("pageup", KeyCode::KEY_PAGEUP),
    ("pagedown", KeyCode::KEY_PAGEDOWN),
    ("up", KeyCode::KEY_UP),
    ("down", KeyCode::KEY_DOWN),
    ("left", KeyCode::KEY_LEFT),
    ("right", KeyCode::KEY_RIGHT),
    ("capslock", KeyCode::KEY_CAPSLOCK),
    ("numlock", KeyCode::KEY_NUMLOCK),
    ("print", KeyCode::KEY_SYSRQ),
    ("printscreen", KeyCode::KEY_SYSRQ),
    ("scrolllock", KeyCode::KEY_SCROLLLOCK),
    ("pause", KeyCode::KEY_PAUSE),
    // Punctuation
    ("minus", KeyCode::KEY_MINUS),
    ("equal", KeyCode::KEY_EQUAL),
    ("leftbrace", KeyCode::KEY_LEFTBRACE),
    ("rightbrace", KeyCode::KEY_RIGHTBRACE),
    ("semicolon", KeyCode::KEY_SEMICOLON),
    ("apostrophe", KeyCode::KEY_APOSTROPHE),
    ("grave", KeyCode::KEY_GRAVE),
    ("backslash", KeyCode::KEY_BACKSLASH),
    ("comma", KeyCode::KEY_COMMA),
    ("dot", KeyCode::KEY_DOT),
    ("slash", KeyCode::KEY_SLASH),
    // Media keys
    ("mute", KeyCode::KEY_MUTE),
    ("volumedown", KeyCode::KEY_VOLUMEDOWN),
    ("volumeup", KeyCode::KEY_VOLUMEUP),
    ("playpause", KeyCode::KEY_PLAYPAUSE),
    ("nextsong", KeyCode::KEY_NEXTSONG),
    ("previoussong", KeyCode::KEY_PREVIOUSSONG),
    ("stop", KeyCode::KEY_STOPCD),
    ("brightnessup", KeyCode::KEY_BRIGHTNESSUP),
    ("brightnessdown", KeyCode::KEY_BRIGHTNESSDOWN),
    // XF86 media key names
    ("xf86audiomute", KeyCode::KEY_MUTE),
    ("xf86audiolowervolume", KeyCode::KEY_VOLUMEDOWN),
    ("xf86audioraisevolume", KeyCode::KEY_VOLUMEUP),
    ("xf86audioplay", KeyCode::KEY_PLAYPAUSE),
    ("xf86audiopause", KeyCode::KEY_PLAYPAUSE),
    ("xf86audionext", KeyCode::KEY_NEXTSONG),
    ("xf86audioprev", KeyCode::KEY_PREVIOUSSONG),
    ("xf86audiostop", KeyCode::KEY_STOPCD),
    ("xf86monbrightnessup", KeyCode::KEY_BRIGHTNESSUP),
    ("xf86monbrightnessdown", KeyCode::KEY_BRIGHTNESSDOWN),
];

fn normalize(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

/// Look up the key code for a key name
pub fn name_to_code(name: &str) -> Option<u16> {
    let name = normalize(name);
    KEY_NAMES
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .map(|(_, key)| key.code())
}

/// Look up the canonical name for a key code
pub fn code_to_name(code: u16) -> Option<&'static str> {
    KEY_NAMES
        .iter()
        .find(|(_, key)| key.code() == code)
        .map(|(name, _)| *name)
}

/// Check whether a key name refers to a modifier key
pub fn is_modifier(name: &str) -> bool {
    let name = normalize(name);
    MODIFIER_NAMES.contains(&name.as_str())
}
