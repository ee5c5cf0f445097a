use crate::api::NoteStore;
use crate::components::ui::{Alert, AlertDescription, AlertError, Spinner};
use crate::editor::session::EditorSession;
use crate::editor::NoteEditor;
use crate::state::AppContext;
use leptos::prelude::*;
use leptos::task::spawn_local;
use leptos_router::params::Params;
use log::{info, warn};

#[derive(Params, PartialEq, Clone, Debug)]
pub struct NoteRouteParams {
    pub note_id: Option<String>,
}

#[component]
pub fn NotePage() -> impl IntoView {
    let app_state = expect_context::<AppContext>();
    let api_client = app_state.0.api_client;
    let unauthorized = app_state.0.unauthorized;
    let params = leptos_router::hooks::use_params::<NoteRouteParams>();

    let note_id = move || {
        params
            .get()
            .ok()
            .and_then(|p| p.note_id)
            .unwrap_or_default()
    };

    let session: RwSignal<Option<RwSignal<EditorSession>>> = RwSignal::new(None);
    let loading: RwSignal<bool> = RwSignal::new(false);
    let error: RwSignal<Option<String>> = RwSignal::new(None);
    // Drops responses for a note the user has already left.
    let req_id: RwSignal<u64> = RwSignal::new(0);

    Effect::new(move |_| {
        let id = note_id();
        session.set(None);
        error.set(None);
        if id.trim().is_empty() {
            return;
        }
        if !api_client.with_untracked(|c| c.is_authenticated()) {
            return;
        }

        let client = api_client.get_untracked();
        let config = app_state.0.sync_config();
        let app = app_state.clone();
        let rid = req_id.get_untracked() + 1;
        req_id.set(rid);
        loading.set(true);

        spawn_local(async move {
            let blocks = client.get_blocks(&id).await;
            // Title is best-effort; the blocks decide whether the page loads.
            let title = match client.get_notes().await {
                Ok(notes) => notes
                    .into_iter()
                    .find(|n| n.id == id)
                    .map(|n| n.title)
                    .unwrap_or_default(),
                Err(e) => {
                    warn!("event=load_title module=pages status=failed note_id={id} error={e}");
                    String::new()
                }
            };

            if req_id.get_untracked() != rid {
                return;
            }

            match blocks {
                Ok(records) => {
                    info!(
                        "event=load_note module=pages status=ok note_id={id} blocks={}",
                        records.len()
                    );
                    let s = EditorSession::load(&id, &title, &records, config);
                    session.set(Some(RwSignal::new(s)));
                }
                Err(e) if e.is_unauthorized() => app.0.mark_unauthorized(),
                Err(e) => {
                    warn!("event=load_note module=pages status=failed note_id={id} error={e}");
                    error.set(Some(e.to_string()));
                }
            }
            loading.set(false);
        });
    });

    let authenticated = move || {
        !unauthorized.get() && api_client.with(|c| c.is_authenticated())
    };

    view! {
        <div class="mx-auto w-full max-w-3xl px-6 py-10">
            <Show
                when=authenticated
                fallback=move || {
                    if unauthorized.get() {
                        view! {
                            <AlertError>
                                <AlertDescription>"Your session has expired. Sign in again to keep editing."</AlertDescription>
                            </AlertError>
                        }
                        .into_any()
                    } else {
                        view! {
                            <Alert>
                                <AlertDescription>"Sign in to edit this note."</AlertDescription>
                            </Alert>
                        }
                        .into_any()
                    }
                }
            >
                <Show when=move || error.get().is_some() fallback=|| ().into_view()>
                    <AlertError class="mb-4">
                        <AlertDescription>{move || error.get().unwrap_or_default()}</AlertDescription>
                    </AlertError>
                </Show>

                {move || match session.get() {
                    Some(s) => view! { <NoteEditor session=s /> }.into_any(),
                    None if loading.get() => view! {
                        <div class="flex items-center gap-2 text-sm text-muted-foreground">
                            <Spinner />
                            "Loading…"
                        </div>
                    }
                    .into_any(),
                    None => ().into_view().into_any(),
                }}
            </Show>
        </div>
    }
}
