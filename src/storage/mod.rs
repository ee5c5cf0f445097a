/// localStorage key the login flow writes the bearer token under.
pub(crate) const TOKEN_KEY: &str = "jwtToken";

fn local_storage() -> Option<web_sys::Storage> {
    web_sys::window().and_then(|w| w.local_storage().ok().flatten())
}

pub(crate) fn load_token_from_storage() -> Option<String> {
    #[cfg(target_arch = "wasm32")]
    {
        let storage = local_storage()?;
        storage
            .get_item(TOKEN_KEY)
            .ok()
            .flatten()
            .filter(|t| !t.trim().is_empty())
    }

    #[cfg(not(target_arch = "wasm32"))]
    {
        None
    }
}

/// Drops a token the backend rejected.
pub(crate) fn clear_token_from_storage() {
    if let Some(storage) = local_storage() {
        let _ = storage.remove_item(TOKEN_KEY);
    }
}
