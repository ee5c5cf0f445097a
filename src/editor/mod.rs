pub(crate) mod command_menu;
pub(crate) mod document;
pub(crate) mod navigation;
pub(crate) mod session;
pub(crate) mod title;

use crate::api::{ApiClient, ImageUpload, NoteStore};
use crate::components::ui::{Button, ButtonSize, ButtonVariant, Spinner};
use crate::models::{BlockKey, BlockVariant};
use crate::state::note_sync::{execute, SyncOp, SyncStatus};
use crate::state::AppContext;
use crate::util::{char_to_utf16_idx, now_ms, utf16_to_char_idx, Timestamp};
use command_menu::BlockCommand;
use icons::X;
use leptos::html;
use leptos::prelude::*;
use leptos::task::spawn_local;
use log::warn;
use navigation::{FocusIntent, Key, KeyInput};
use session::{EditorSession, SessionUpdate, UploadTarget};
use std::collections::VecDeque;
use title::TitleEditor;
use tw_merge::tw_merge;
use wasm_bindgen::JsCast;

fn block_dom_id(key: BlockKey) -> String {
    format!("block-{}", key.0)
}

fn block_textarea(key: BlockKey) -> Option<web_sys::HtmlTextAreaElement> {
    web_sys::window()?
        .document()?
        .get_element_by_id(&block_dom_id(key))?
        .dyn_into::<web_sys::HtmlTextAreaElement>()
        .ok()
}

/// Shared handles for the block views of one open note.
#[derive(Clone, Copy)]
pub(crate) struct EditorCtx {
    pub session: RwSignal<EditorSession>,
    focus: RwSignal<Option<FocusIntent>>,
    upload_for: RwSignal<Option<BlockKey>>,
    uploading: RwSignal<bool>,
    /// The single debounce timer.
    timer: StoredValue<Option<i32>>,
    app: StoredValue<AppContext>,
    file_input: NodeRef<html::Input>,
}

impl EditorCtx {
    fn client(&self) -> ApiClient {
        self.app.with_value(|app| app.0.api_client.get_untracked())
    }

    fn now() -> Timestamp {
        Timestamp::now()
    }

    fn index_of(&self, key: BlockKey) -> Option<usize> {
        self.session
            .with_untracked(|s| s.document().index_of_key(key))
    }

    /// Turns a session update into effects: focus, file picker, sync calls.
    fn handle(&self, update: SessionUpdate) {
        if let Some(intent) = update.focus {
            self.focus.set(Some(intent));
        }
        if let Some(key) = update.upload_requested {
            self.upload_for.set(Some(key));
            if let Some(el) = self.file_input.get_untracked() {
                el.click();
            }
        }
        self.run_ops(update.ops);
        self.arm_timer();
    }

    /// Runs ops one after another, feeding each result back to the session.
    fn run_ops(&self, ops: Vec<SyncOp>) {
        if ops.is_empty() {
            return;
        }
        let ctx = *self;
        spawn_local(async move {
            let client = ctx.client();
            let mut queue = VecDeque::from(ops);
            while let Some(op) = queue.pop_front() {
                let result = execute(&client, &op).await;
                let Some(outcome) = ctx.session.try_update(|s| s.apply_result(&op, result)) else {
                    return;
                };
                if outcome.status == SyncStatus::Unauthorized {
                    ctx.app.with_value(|app| app.0.mark_unauthorized());
                    return;
                }
                queue.extend(outcome.follow_up);
            }
            ctx.arm_timer();
        });
    }

    /// Re-arms the debounce timer for the earliest pending field.
    fn arm_timer(&self) {
        let Some(window) = web_sys::window() else {
            return;
        };
        if let Some(tid) = self.timer.get_value() {
            window.clear_timeout_with_handle(tid);
        }
        self.timer.set_value(None);

        let Some(due) = self.session.with_untracked(|s| s.next_deadline()) else {
            return;
        };
        let delay = (due - now_ms()).clamp(0, i32::MAX as i64) as i32;

        let ctx = *self;
        let cb = wasm_bindgen::closure::Closure::once_into_js(move || {
            let Some(ops) = ctx.session.try_update(|s| s.tick(now_ms())) else {
                return;
            };
            ctx.timer.set_value(None);
            ctx.run_ops(ops);
            ctx.arm_timer();
        });
        let tid = window
            .set_timeout_with_callback_and_timeout_and_arguments_0(cb.as_ref().unchecked_ref(), delay)
            .ok();
        self.timer.set_value(tid);
    }

    fn upload(&self, key: BlockKey, file: web_sys::File) {
        let ctx = *self;
        ctx.uploading.set(true);
        spawn_local(async move {
            let bytes = match wasm_bindgen_futures::JsFuture::from(file.array_buffer()).await {
                Ok(buf) => js_sys::Uint8Array::new(&buf).to_vec(),
                Err(e) => {
                    warn!("event=upload module=editor status=failed reason=read_file error={e:?}");
                    ctx.uploading.set(false);
                    return;
                }
            };
            let upload = ImageUpload {
                file_name: file.name(),
                mime: if file.type_().is_empty() {
                    "application/octet-stream".to_string()
                } else {
                    file.type_()
                },
                bytes,
            };

            let client = ctx.client();
            let Some(block_id) = ctx.resolve_upload_target(&client, key).await else {
                ctx.uploading.set(false);
                return;
            };
            let note_id = ctx.session.with_untracked(|s| s.note_id().to_string());

            match client.request_image_upload(&note_id, &block_id, upload).await {
                Ok(path) => {
                    if let Some(update) = ctx
                        .session
                        .try_update(|s| s.complete_image_upload(key, &path, &Self::now()))
                    {
                        ctx.handle(update);
                    }
                }
                Err(e) if e.is_unauthorized() => ctx.app.with_value(|app| app.0.mark_unauthorized()),
                Err(e) => warn!("event=upload module=editor status=failed error={e}"),
            }
            ctx.uploading.set(false);
        });
    }

    /// Block id to file the upload under, reconciling first if the block is
    /// still local.
    async fn resolve_upload_target(&self, client: &ApiClient, key: BlockKey) -> Option<String> {
        for _ in 0..2 {
            match self.session.try_update(|s| s.upload_target(key)).flatten()? {
                UploadTarget::Ready { block_id } => return Some(block_id),
                UploadTarget::NeedsSync(op) => {
                    let result = execute(client, &op).await;
                    let outcome = self.session.try_update(|s| s.apply_result(&op, result))?;
                    if outcome.status != SyncStatus::Applied {
                        return None;
                    }
                }
            }
        }
        warn!("event=upload module=editor status=failed reason=no_block_id key={}", key.0);
        None
    }
}

/// Title and block list of the open note.
#[component]
pub fn NoteEditor(session: RwSignal<EditorSession>) -> impl IntoView {
    let app_state = expect_context::<AppContext>();
    let ctx = EditorCtx {
        session,
        focus: RwSignal::new(None),
        upload_for: RwSignal::new(None),
        uploading: RwSignal::new(false),
        timer: StoredValue::new(None),
        app: StoredValue::new(app_state),
        file_input: NodeRef::new(),
    };
    provide_context(ctx);

    // Initial caret.
    Effect::new(move |prev: Option<()>| {
        if prev.is_none() {
            if let Some(intent) = session.try_update(|s| s.initial_focus()).flatten() {
                ctx.focus.set(Some(intent));
            }
        }
    });

    // Turn focus intents into DOM focus on the next tick, once the row exists.
    Effect::new(move |_| {
        let Some(intent) = ctx.focus.get() else {
            return;
        };
        let Some(window) = web_sys::window() else {
            return;
        };
        let cb = wasm_bindgen::closure::Closure::once_into_js(move || {
            let Some(el) = block_textarea(intent.key) else {
                return;
            };
            let _ = el.focus();
            // selectionStart/End are in UTF-16 code units.
            let pos = char_to_utf16_idx(&el.value(), intent.caret);
            let _ = el.set_selection_range(pos, pos);
        });
        let _ = window
            .set_timeout_with_callback_and_timeout_and_arguments_0(cb.as_ref().unchecked_ref(), 0);
    });

    let timer = ctx.timer;
    on_cleanup(move || {
        if let (Some(window), Some(Some(tid))) = (web_sys::window(), timer.try_get_value()) {
            window.clear_timeout_with_handle(tid);
        }
    });

    let keys = move || {
        session.with(|s| s.blocks().iter().map(|b| b.key).collect::<Vec<_>>())
    };

    let on_file_change = move |ev: web_sys::Event| {
        let Some(input) = ev
            .target()
            .and_then(|t| t.dyn_into::<web_sys::HtmlInputElement>().ok())
        else {
            return;
        };
        let file = input.files().and_then(|files| files.get(0));
        // Allow picking the same file again.
        input.set_value("");
        let (Some(file), Some(key)) = (file, ctx.upload_for.get_untracked()) else {
            return;
        };
        ctx.upload_for.set(None);
        ctx.upload(key, file);
    };

    let on_append = move |_| {
        if let Some(update) = session.try_update(|s| s.append_text_block(&EditorCtx::now())) {
            ctx.handle(update);
        }
    };

    view! {
        <div class="flex flex-col gap-1">
            <TitleInput session=session />
            <For
                each=keys
                key=|k| k.0
                children=move |k| view! { <BlockView block_key=k /> }
            />

            <div class="mt-2 flex items-center gap-2">
                <Button variant=ButtonVariant::Ghost size=ButtonSize::Sm on:click=on_append>
                    "+ Add block"
                </Button>
                <Show when=move || ctx.uploading.get() fallback=|| ().into_view()>
                    <Spinner />
                </Show>
                <span class="text-xs text-muted-foreground">
                    {move || if session.with(|s| s.sync().has_pending()) { "Saving…" } else { "" }}
                </span>
            </div>

            <input
                type="file"
                accept="image/*"
                class="hidden"
                node_ref=ctx.file_input
                on:change=on_file_change
            />
        </div>
    }
}

#[component]
fn BlockView(block_key: BlockKey) -> impl IntoView {
    let ctx = expect_context::<EditorCtx>();
    let session = ctx.session;

    let variant = move || {
        session.with(|s| {
            s.document()
                .block_by_key(block_key)
                .map(|b| b.variant.clone())
        })
    };

    let on_dragstart = move |ev: web_sys::DragEvent| {
        let Some(from) = ctx.index_of(block_key) else {
            return;
        };
        if let Some(dt) = ev.data_transfer() {
            let _ = dt.set_data("text/plain", &from.to_string());
            dt.set_drop_effect("move");
        }
    };

    let on_dragover = move |ev: web_sys::DragEvent| {
        ev.prevent_default();
        if let Some(dt) = ev.data_transfer() {
            dt.set_drop_effect("move");
        }
    };

    let on_drop = move |ev: web_sys::DragEvent| {
        ev.prevent_default();
        let from = ev
            .data_transfer()
            .and_then(|dt| dt.get_data("text/plain").ok())
            .and_then(|s| s.trim().parse::<usize>().ok());
        let (Some(from), Some(to)) = (from, ctx.index_of(block_key)) else {
            return;
        };
        if from == to {
            return;
        }
        if let Some(update) = session.try_update(|s| s.reorder(from, to, &EditorCtx::now())) {
            ctx.handle(update);
        }
    };

    view! {
        <div
            class="group relative flex items-start gap-2 rounded-md py-0.5"
            draggable="true"
            on:dragstart=on_dragstart
            on:dragover=on_dragover
            on:drop=on_drop
        >
            <span class="mt-1.5 cursor-grab select-none text-xs text-muted-foreground opacity-0 group-hover:opacity-100">
                "⋮⋮"
            </span>
            {move || match variant() {
                Some(BlockVariant::Text { .. }) => view! { <TextBlock block_key=block_key /> }.into_any(),
                Some(BlockVariant::Image { image_path }) => {
                    view! { <ImageBlock block_key=block_key image_path=image_path /> }.into_any()
                }
                None => ().into_view().into_any(),
            }}
        </div>
    }
}

#[component]
fn TextBlock(block_key: BlockKey) -> impl IntoView {
    let ctx = expect_context::<EditorCtx>();
    let session = ctx.session;

    let content = move || {
        session.with(|s| {
            s.document()
                .block_by_key(block_key)
                .and_then(|b| b.variant.text_content().map(str::to_string))
                .unwrap_or_default()
        })
    };

    let on_input = move |ev: web_sys::Event| {
        let Some(index) = ctx.index_of(block_key) else {
            return;
        };
        let value = event_target_value(&ev);
        if let Some(update) = session.try_update(|s| s.input(index, &value, &EditorCtx::now())) {
            ctx.handle(update);
        }
    };

    let on_keydown = move |ev: web_sys::KeyboardEvent| {
        let input = KeyInput::from_dom(&ev.key(), ev.shift_key());
        if input.key == Key::Other {
            return;
        }
        let Some(index) = ctx.index_of(block_key) else {
            return;
        };
        let Some(el) = ev
            .target()
            .and_then(|t| t.dyn_into::<web_sys::HtmlTextAreaElement>().ok())
        else {
            return;
        };

        let start = el.selection_start().ok().flatten().unwrap_or(0);
        let end = el.selection_end().ok().flatten().unwrap_or(start);
        if start != end {
            // A selection is being edited; leave it to the textarea.
            return;
        }
        let caret = utf16_to_char_idx(&el.value(), start);

        if let Some(update) = session.try_update(|s| s.key(index, caret, input, &EditorCtx::now())) {
            if update.handled {
                ev.prevent_default();
            }
            ctx.handle(update);
        }
    };

    let on_focus = move |_| {
        let Some(index) = ctx.index_of(block_key) else {
            return;
        };
        let caret = block_textarea(block_key)
            .map(|el| {
                let start = el.selection_start().ok().flatten().unwrap_or(0);
                utf16_to_char_idx(&el.value(), start)
            })
            .unwrap_or(0);
        session.update(|s| {
            s.focus_block(index, caret);
        });
    };

    view! {
        <div class="relative w-full min-w-0">
            <textarea
                id=block_dom_id(block_key)
                rows="1"
                class="field-sizing-content w-full resize-none bg-transparent px-1 py-1 text-sm leading-relaxed outline-none placeholder:text-muted-foreground/60"
                placeholder="Type '/' for commands"
                prop:value=content
                on:input=on_input
                on:keydown=on_keydown
                on:focus=on_focus
            ></textarea>
            <CommandMenuView block_key=block_key />
        </div>
    }
}

#[component]
fn CommandMenuView(block_key: BlockKey) -> impl IntoView {
    let ctx = expect_context::<EditorCtx>();
    let session = ctx.session;

    let menu = move || {
        session.with(|s| {
            s.menu()
                .filter(|(k, _)| *k == block_key)
                .map(|(_, m)| (m.options().to_vec(), m.highlighted()))
        })
    };

    move || {
        let Some((options, highlighted)) = menu() else {
            return ().into_view().into_any();
        };

        view! {
            <div
                role="listbox"
                class="absolute left-0 top-full z-10 mt-1 w-48 rounded-md border bg-popover p-1 text-sm shadow-md"
            >
                {options
                    .into_iter()
                    .enumerate()
                    .map(|(i, command)| {
                        let selected = i == highlighted;
                        let class = tw_merge!(
                            "flex w-full cursor-pointer items-center rounded-sm px-2 py-1.5 capitalize",
                            if selected { "bg-accent text-accent-foreground" } else { "hover:bg-muted" }
                        );
                        view! {
                            <div
                                role="option"
                                aria-selected=selected.to_string()
                                class=class
                                // mousedown keeps the textarea focused.
                                on:mousedown=move |ev: web_sys::MouseEvent| {
                                    ev.prevent_default();
                                    select(ctx, command);
                                }
                            >
                                {command.to_string()}
                            </div>
                        }
                    })
                    .collect_view()}
            </div>
        }
        .into_any()
    }
}

fn select(ctx: EditorCtx, command: BlockCommand) {
    if let Some(update) = ctx
        .session
        .try_update(|s| s.select_command(command, &EditorCtx::now()))
    {
        ctx.handle(update);
    }
}

#[component]
fn ImageBlock(block_key: BlockKey, image_path: String) -> impl IntoView {
    let ctx = expect_context::<EditorCtx>();
    let src = ctx.client().resolve_image_url(&image_path);

    let on_delete = move |_| {
        let Some(index) = ctx.index_of(block_key) else {
            return;
        };
        if let Some(update) = ctx
            .session
            .try_update(|s| s.delete_block_at(index, &EditorCtx::now()))
        {
            ctx.handle(update);
        }
    };

    view! {
        <div class="relative w-full py-1">
            <img src=src alt=image_path class="max-h-96 max-w-full rounded-md border" draggable="false" />
            <Button
                class="absolute right-1 top-2 opacity-0 group-hover:opacity-100"
                variant=ButtonVariant::Ghost
                size=ButtonSize::Icon
                attr:aria-label="Remove image"
                on:click=on_delete
            >
                <X />
            </Button>
        </div>
    }
}

#[component]
fn TitleInput(session: RwSignal<EditorSession>) -> impl IntoView {
    let ctx = expect_context::<EditorCtx>();
    let title = move || session.with(|s| s.title().to_string());

    let on_input = move |ev: web_sys::Event| {
        let value = event_target_value(&ev);
        let changed = session
            .try_update(|s| s.title_input(&value, &EditorCtx::now()))
            .unwrap_or(false);
        if changed {
            ctx.arm_timer();
        }
    };

    view! {
        <input
            class="w-full bg-transparent text-2xl font-semibold outline-none placeholder:text-muted-foreground/50"
            placeholder=TitleEditor::PLACEHOLDER
            prop:value=title
            on:input=on_input
        />
    }
}
