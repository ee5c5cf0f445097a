mod api;
mod app;
mod components;
mod editor;
mod logging;
mod models;
mod pages;
mod state;
mod storage;
mod util;

use crate::app::App;
use leptos::prelude::*;

// Needed for `#[wasm_bindgen(start)]` on the wasm entrypoint.
#[cfg(all(target_arch = "wasm32", not(test)))]
use wasm_bindgen::prelude::wasm_bindgen;


#[cfg_attr(all(target_arch = "wasm32", not(test)), wasm_bindgen(start))]
pub fn main() {
    console_error_panic_hook::set_once();
    if let Err(e) = logging::init_logging(logging::default_log_level()) {
        web_sys::console::warn_1(&e.into());
    }
    log::info!(
        "event=startup module=app status=ok log_level={}",
        logging::logging_status().unwrap_or("off")
    );
    mount_to_body(App);
}
