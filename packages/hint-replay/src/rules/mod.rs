//! Rules bundled with the replay driver.

pub mod apple_touch_icons;
pub mod no_http_redirects;

use std::sync::Arc;

use hint_core::Rule;

pub use apple_touch_icons::AppleTouchIcons;
pub use no_http_redirects::NoHttpRedirects;

/// Every bundled rule, in registration order.
pub fn builtin() -> Vec<Arc<dyn Rule>> {
    vec![Arc::new(NoHttpRedirects), Arc::new(AppleTouchIcons)]
}
