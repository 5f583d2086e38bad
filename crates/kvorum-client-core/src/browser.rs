//! Browser bindings: Web Storage as a [`KeyValueStore`], the callback
//! page's location, and the popup opener as an [`OpenerChannel`].

use wasm_bindgen::JsCast;
use web_sys::{Storage, Window};

use crate::session::KeyValueStore;
use crate::telegram::{OpenerChannel, RedirectLocation, TelegramAuthMessage, WindowContext};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrowserError {
    #[error("window is unavailable")]
    NoWindow,
    #[error("{area} storage is unavailable")]
    StorageUnavailable { area: &'static str },
    #[error("browser call failed: {operation}")]
    Js { operation: &'static str },
    #[error("message encoding failed: {0}")]
    Encode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageArea {
    /// Survives restarts; holds the access token.
    Local,
    /// Per tab; holds the questionnaire cache.
    Session,
}

impl StorageArea {
    fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Session => "session",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BrowserStorage {
    area: StorageArea,
}

impl BrowserStorage {
    #[must_use]
    pub fn local() -> Self {
        Self {
            area: StorageArea::Local,
        }
    }

    #[must_use]
    pub fn session() -> Self {
        Self {
            area: StorageArea::Session,
        }
    }

    fn storage(&self) -> Result<Storage, BrowserError> {
        let window = web_sys::window().ok_or(BrowserError::NoWindow)?;
        let storage = match self.area {
            StorageArea::Local => window.local_storage(),
            StorageArea::Session => window.session_storage(),
        };
        storage
            .ok()
            .flatten()
            .ok_or(BrowserError::StorageUnavailable {
                area: self.area.as_str(),
            })
    }
}

impl KeyValueStore for BrowserStorage {
    type Error = BrowserError;

    fn get(&self, key: &str) -> Result<Option<String>, Self::Error> {
        self.storage()?
            .get_item(key)
            .map_err(|_| BrowserError::Js {
                operation: "storage.getItem",
            })
    }

    fn set(&self, key: &str, value: &str) -> Result<(), Self::Error> {
        self.storage()?
            .set_item(key, value)
            .map_err(|_| BrowserError::Js {
                operation: "storage.setItem",
            })
    }

    fn remove(&self, key: &str) -> Result<(), Self::Error> {
        self.storage()?
            .remove_item(key)
            .map_err(|_| BrowserError::Js {
                operation: "storage.removeItem",
            })
    }
}

fn window() -> Result<Window, BrowserError> {
    web_sys::window().ok_or(BrowserError::NoWindow)
}

pub fn current_redirect_location() -> Result<RedirectLocation, BrowserError> {
    let location = window()?.location();
    let query = location.search().map_err(|_| BrowserError::Js {
        operation: "location.search",
    })?;
    let fragment = location.hash().map_err(|_| BrowserError::Js {
        operation: "location.hash",
    })?;
    Ok(RedirectLocation::new(&query, &fragment))
}

pub fn current_origin() -> Result<String, BrowserError> {
    window()?.location().origin().map_err(|_| BrowserError::Js {
        operation: "location.origin",
    })
}

/// The window that opened the Telegram popup.
#[derive(Debug, Clone)]
pub struct WindowOpener {
    window: Window,
}

impl OpenerChannel for WindowOpener {
    type Error = BrowserError;

    fn post_message(
        &self,
        message: &TelegramAuthMessage,
        target_origin: &str,
    ) -> Result<(), Self::Error> {
        let encoded = serde_json::to_string(message)
            .map_err(|error| BrowserError::Encode(error.to_string()))?;
        let value = js_sys::JSON::parse(&encoded).map_err(|_| BrowserError::Js {
            operation: "JSON.parse",
        })?;
        self.window
            .post_message(&value, target_origin)
            .map_err(|_| BrowserError::Js {
                operation: "window.postMessage",
            })
    }
}

/// Reads origin and opener once, at page start.
pub fn detect_window_context() -> Result<WindowContext<WindowOpener>, BrowserError> {
    let window = window()?;
    let origin = window.location().origin().map_err(|_| BrowserError::Js {
        operation: "location.origin",
    })?;
    // The opener is a cross-realm proxy, so an instanceof check would fail.
    let opener = window
        .opener()
        .ok()
        .filter(|value| !value.is_null() && !value.is_undefined())
        .map(|value| WindowOpener {
            window: value.unchecked_into::<Window>(),
        });
    Ok(WindowContext { origin, opener })
}
