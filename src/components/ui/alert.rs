use leptos::prelude::*;
use leptos_ui::clx;

mod components {
    use super::*;
    clx! {Alert, div, "w-full rounded-md border px-3 py-2 text-sm"}
    clx! {AlertError, div, "w-full rounded-md border border-destructive/50 px-3 py-2 text-sm text-destructive"}
    clx! {AlertDescription, p, "text-sm leading-relaxed"}
}

pub use components::*;
