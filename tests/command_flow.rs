mod common;

use async_trait::async_trait;
use chatflow::bot::commands::{
    ArgumentSpec, Args, CommandContext, CommandDefinition, CommandHandler, DispatchOutcome,
    Middleware,
};
use chatflow::bot::{builtin, Attachment, IncomingMessage};
use chatflow::error::{CommandError, StoreError};
use chatflow::store::{KeyValueStore, MemoryStore};
use chatflow::users::{RequireUser, UserDirectory};
use common::{harness, harness_on, harness_with, text, until_waiting, Sent, CHAT};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use teloxide::types::MessageId;

type Typed = (Option<String>, Option<bool>, Option<i64>);

/// Handler remembering the arguments of every run.
#[derive(Clone, Default)]
struct Recorder {
    runs: Arc<Mutex<Vec<Args>>>,
    typed: Arc<Mutex<Vec<Typed>>>,
}

impl Recorder {
    fn runs(&self) -> Vec<Args> {
        self.runs.lock().expect("lock").clone()
    }

    fn typed(&self) -> Vec<Typed> {
        self.typed.lock().expect("lock").clone()
    }
}

#[async_trait]
impl CommandHandler for Recorder {
    async fn handle(&self, ctx: &CommandContext) -> anyhow::Result<()> {
        self.runs.lock().expect("lock").push(ctx.args.clone());
        self.typed.lock().expect("lock").push((
            ctx.arg_str("title").map(str::to_string),
            ctx.arg_bool("confirm"),
            ctx.arg_i64("limit"),
        ));
        Ok(())
    }
}

async fn explode(_ctx: CommandContext) -> anyhow::Result<()> {
    anyhow::bail!("report backend unavailable")
}

fn report(handler: impl CommandHandler + 'static) -> CommandDefinition {
    CommandDefinition::new("report", "Monthly report")
        .arg(ArgumentSpec::text("title", "report title"))
        .arg(ArgumentSpec::boolean("confirm", "include drafts").optional())
        .arg(ArgumentSpec::number("limit", "row limit").optional())
        .handler(handler)
}

#[tokio::test]
async fn test_collects_arguments_in_order() {
    let h = harness();
    let recorder = Recorder::default();
    h.engine.define_command(report(recorder.clone())).await.expect("command registers");

    let run = h.engine.handle_message(text(1, "/report")).await.expect("command triggered");
    until_waiting(&h.engine).await;
    assert!(h.engine.handle_message(text(2, "  Q3 summary ")).await.is_none());
    until_waiting(&h.engine).await;
    h.engine.handle_message(text(3, "/yes")).await;
    until_waiting(&h.engine).await;
    h.engine.handle_message(text(4, "/skip")).await;

    assert!(matches!(run.await.expect("dispatch task"), DispatchOutcome::Completed));
    let runs = recorder.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].get("title"), Some(&json!("Q3 summary")));
    assert_eq!(runs[0].get("confirm"), Some(&json!(true)));
    assert!(!runs[0].contains_key("limit"));

    let prompts = h.api.texts();
    assert_eq!(prompts.len(), 3);
    assert!(prompts[0].contains("report title"));
    assert!(prompts[1].contains("/yes"));
    assert!(prompts[2].contains("/skip"));
}

#[tokio::test]
async fn test_inline_query_prefills_arguments() {
    let h = harness();
    let recorder = Recorder::default();
    h.engine.define_command(report(recorder.clone())).await.expect("command registers");

    let run = h
        .engine
        .handle_message(text(1, "/report?title=Q3&limit=5&unknown=1"))
        .await
        .expect("command triggered");
    until_waiting(&h.engine).await;
    h.engine.handle_message(text(2, "/no")).await;

    assert!(matches!(run.await.expect("dispatch task"), DispatchOutcome::Completed));
    let runs = recorder.runs();
    assert_eq!(runs[0].get("title"), Some(&json!("Q3")));
    assert_eq!(runs[0].get("limit"), Some(&json!(5)));
    assert_eq!(runs[0].get("confirm"), Some(&json!(false)));
    assert!(!runs[0].contains_key("unknown"));
    assert_eq!(
        recorder.typed(),
        vec![(Some("Q3".to_string()), Some(false), Some(5))]
    );
    assert_eq!(h.api.texts().len(), 1);
}

#[tokio::test]
async fn test_confirmation_for_text_argument_aborts() {
    let h = harness();
    let recorder = Recorder::default();
    h.engine.define_command(report(recorder.clone())).await.expect("command registers");

    let run = h.engine.handle_message(text(1, "/report")).await.expect("command triggered");
    until_waiting(&h.engine).await;
    h.engine.handle_message(text(2, "/yes")).await;

    match run.await.expect("dispatch task") {
        DispatchOutcome::Failed(CommandError::UnexpectedConfirmation(name)) => {
            assert_eq!(name, "title");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(recorder.runs().is_empty());
}

#[tokio::test]
async fn test_skip_of_required_argument_aborts() {
    let h = harness();
    let recorder = Recorder::default();
    h.engine.define_command(report(recorder.clone())).await.expect("command registers");

    let run = h.engine.handle_message(text(1, "/report")).await.expect("command triggered");
    until_waiting(&h.engine).await;
    h.engine.handle_message(text(2, "/skip")).await;

    assert!(matches!(
        run.await.expect("dispatch task"),
        DispatchOutcome::Failed(CommandError::RequiredSkipped(_))
    ));
    assert!(recorder.runs().is_empty());
}

#[tokio::test]
async fn test_invalid_number_aborts() {
    let h = harness();
    let recorder = Recorder::default();
    h.engine
        .define_command(
            CommandDefinition::new("top", "Top rows")
                .arg(ArgumentSpec::number("limit", "row limit"))
                .handler(recorder.clone()),
        )
        .await
        .expect("command registers");

    let run = h.engine.handle_message(text(1, "/top")).await.expect("command triggered");
    until_waiting(&h.engine).await;
    h.engine.handle_message(text(2, "ten")).await;

    match run.await.expect("dispatch task") {
        DispatchOutcome::Failed(CommandError::InvalidNumber { argument, value }) => {
            assert_eq!(argument, "limit");
            assert_eq!(value, "ten");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn test_new_command_interrupts_and_cleanup_runs() {
    let h = harness();
    let recorder = Recorder::default();
    let cleaned = Recorder::default();
    h.engine
        .define_command(report(recorder.clone()).cleanup(cleaned.clone()))
        .await
        .expect("command registers");

    let run = h.engine.handle_message(text(1, "/report")).await.expect("command triggered");
    until_waiting(&h.engine).await;
    // not a registered command, so nothing else is dispatched
    assert!(h.engine.handle_message(text(2, "/status now")).await.is_none());

    match run.await.expect("dispatch task") {
        DispatchOutcome::Failed(CommandError::Interrupted(by)) => assert_eq!(by, "/status"),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(recorder.runs().is_empty());
    assert_eq!(cleaned.runs().len(), 1);
    assert_eq!(h.engine.pending_replies(CHAT), 0);
}

#[tokio::test]
async fn test_redelivered_trigger_is_ignored() {
    let h = harness();
    let recorder = Recorder::default();
    h.engine.define_command(report(recorder.clone())).await.expect("command registers");

    let run = h.engine.handle_message(text(1, "/report")).await.expect("command triggered");
    until_waiting(&h.engine).await;

    // same update delivered twice by the platform
    assert!(h.engine.handle_message(text(1, "/report")).await.is_none());
    assert_eq!(h.engine.pending_replies(CHAT), 1);

    h.engine.handle_message(text(2, "Q3")).await;
    until_waiting(&h.engine).await;
    h.engine.handle_message(text(3, "/no")).await;
    until_waiting(&h.engine).await;
    h.engine.handle_message(text(4, "/skip")).await;

    assert!(matches!(run.await.expect("dispatch task"), DispatchOutcome::Completed));
    assert_eq!(recorder.runs().len(), 1);
    assert_eq!(recorder.runs()[0].get("title"), Some(&json!("Q3")));
}

#[tokio::test]
async fn test_retrigger_within_lock_window_keeps_flow() {
    let h = harness();
    let recorder = Recorder::default();
    h.engine.define_command(report(recorder.clone())).await.expect("command registers");

    let run = h.engine.handle_message(text(1, "/report")).await.expect("command triggered");
    until_waiting(&h.engine).await;

    assert!(h.engine.handle_message(text(2, "/report")).await.is_none());
    assert_eq!(h.engine.pending_replies(CHAT), 1);

    h.engine.handle_message(text(3, "Q4")).await;
    until_waiting(&h.engine).await;
    h.engine.handle_message(text(4, "/yes")).await;
    until_waiting(&h.engine).await;
    h.engine.handle_message(text(5, "/skip")).await;

    assert!(matches!(run.await.expect("dispatch task"), DispatchOutcome::Completed));
    assert_eq!(recorder.runs()[0].get("title"), Some(&json!("Q4")));
}

struct Directory(Option<Value>);

#[async_trait]
impl UserDirectory for Directory {
    async fn find_by_chat(&self, _chat_id: i64) -> anyhow::Result<Option<Value>> {
        Ok(self.0.clone())
    }
}

#[tokio::test]
async fn test_middleware_abort_stops_before_arguments() {
    let h = harness();
    let recorder = Recorder::default();
    let guard = RequireUser::new(Arc::new(Directory(None))).with_message("Please register first.");
    h.engine
        .define_command(report(recorder.clone()).middleware(guard))
        .await
        .expect("command registers");

    let outcome = h.engine.dispatch("report", text(1, "/report"), None).await;

    match outcome {
        DispatchOutcome::Aborted(Some(message)) => assert_eq!(message, "Please register first."),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(h.api.texts(), vec!["Please register first.".to_string()]);
    assert!(recorder.runs().is_empty());
    assert_eq!(h.engine.pending_replies(CHAT), 0);
}

#[tokio::test]
async fn test_middleware_enriches_context() {
    let h = harness();
    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    let guard: Arc<dyn Middleware> =
        Arc::new(RequireUser::new(Arc::new(Directory(Some(json!({"name": "ada"}))))));
    h.engine
        .define_command(
            CommandDefinition::new("whoami", "Show the current user")
                .shared_middleware(guard)
                .handler(move |ctx: CommandContext| {
                    let sink = Arc::clone(&sink);
                    async move {
                        *sink.lock().expect("lock") = ctx.user.clone();
                        anyhow::Ok(())
                    }
                }),
        )
        .await
        .expect("command registers");

    let outcome = h.engine.dispatch("whoami", text(1, "/whoami"), None).await;

    assert!(matches!(outcome, DispatchOutcome::Completed));
    assert_eq!(*seen.lock().expect("lock"), Some(json!({"name": "ada"})));
}

#[tokio::test]
async fn test_concurrent_triggers_are_debounced() {
    let h = harness();
    let calls = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&calls);
    h.engine
        .define_command(CommandDefinition::new("sync", "Sync data").handler(
            move |_ctx: CommandContext| {
                let counter = Arc::clone(&counter);
                async move {
                    *counter.lock().expect("lock") += 1;
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    anyhow::Ok(())
                }
            },
        ))
        .await
        .expect("command registers");

    let (first, second) = tokio::join!(
        h.engine.dispatch("sync", text(1, "/sync"), None),
        h.engine.dispatch("sync", text(2, "/sync"), None),
    );

    let outcomes = [first, second];
    assert_eq!(
        outcomes.iter().filter(|o| matches!(o, DispatchOutcome::Completed)).count(),
        1
    );
    assert_eq!(
        outcomes.iter().filter(|o| matches!(o, DispatchOutcome::Debounced)).count(),
        1
    );
    assert_eq!(*calls.lock().expect("lock"), 1);

    // the lock expires on its own
    tokio::time::sleep(Duration::from_millis(400)).await;
    let third = h.engine.dispatch("sync", text(3, "/sync"), None).await;
    assert!(matches!(third, DispatchOutcome::Completed));
    assert_eq!(*calls.lock().expect("lock"), 2);
}

fn csv_attachment() -> Attachment {
    Attachment {
        file_id: "file-1".into(),
        unique_id: "uniq1".into(),
        file_name: Some("rows.csv".into()),
        mime_type: Some("text/csv".into()),
        size: 9,
    }
}

fn import(handler: impl CommandHandler + 'static) -> CommandDefinition {
    CommandDefinition::new("import", "Import rows")
        .arg(
            ArgumentSpec::file("rows", "the filled template")
                .template("import.csv")
                .accept("text/csv"),
        )
        .handler(handler)
}

#[tokio::test]
async fn test_downloaded_file_removed_after_success() {
    let h = harness();
    std::fs::write(h.documents.path().join("import.csv"), "id,name\n").expect("write template");
    *h.api.download.lock().expect("lock") = b"1,widget\n".to_vec();

    let seen = Arc::new(Mutex::new(None::<(PathBuf, String)>));
    let sink = Arc::clone(&seen);
    h.engine
        .define_command(import(move |ctx: CommandContext| {
            let sink = Arc::clone(&sink);
            async move {
                let path = ctx
                    .arg_path("rows")
                    .ok_or_else(|| anyhow::anyhow!("rows not collected"))?
                    .to_path_buf();
                let content = tokio::fs::read_to_string(&path).await?;
                *sink.lock().expect("lock") = Some((path, content));
                anyhow::Ok(())
            }
        }))
        .await
        .expect("command registers");

    let run = h.engine.handle_message(text(1, "/import")).await.expect("command triggered");
    until_waiting(&h.engine).await;
    h.engine
        .handle_message(IncomingMessage::document(CHAT, MessageId(2), csv_attachment()))
        .await;

    assert!(matches!(run.await.expect("dispatch task"), DispatchOutcome::Completed));
    let (path, content) = seen
        .lock()
        .expect("lock")
        .clone()
        .expect("handler ran");
    assert_eq!(content, "1,widget\n");
    assert!(path.starts_with(h.temp.path()));
    assert!(!path.exists());

    // the prompt went out as the template document with the prompt as caption
    let calls = h.api.calls();
    let Sent::Document(_, document, options) = &calls[0] else {
        panic!("expected template document, got {calls:?}");
    };
    assert_eq!(document.file_name, "import.csv");
    assert!(options.caption.as_deref().expect("prompt caption").contains("text/csv"));
}

#[tokio::test]
async fn test_downloaded_file_removed_after_failure() {
    let h = harness();
    std::fs::write(h.documents.path().join("import.csv"), "id,name\n").expect("write template");
    h.engine.define_command(import(explode)).await.expect("command registers");

    let run = h.engine.handle_message(text(1, "/import")).await.expect("command triggered");
    until_waiting(&h.engine).await;
    h.engine
        .handle_message(IncomingMessage::document(CHAT, MessageId(2), csv_attachment()))
        .await;

    assert!(matches!(
        run.await.expect("dispatch task"),
        DispatchOutcome::Failed(CommandError::Hook(_))
    ));
    let leftovers = std::fs::read_dir(h.temp.path()).expect("temp dir readable").count();
    assert_eq!(leftovers, 0);
}

/// Store whose writes of file cleanup pointers fail.
struct FilesDown(MemoryStore);

#[async_trait]
impl KeyValueStore for FilesDown {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.0.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        if key.starts_with("files:") {
            return Err(StoreError::Backend("down".into()));
        }
        self.0.set(key, value, ttl).await
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.0.set_if_absent(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.0.delete(key).await
    }
}

#[tokio::test]
async fn test_downloaded_file_removed_when_it_cannot_be_recorded() {
    let h = harness_on(Arc::new(FilesDown(MemoryStore::new(100))));
    std::fs::write(h.documents.path().join("import.csv"), "id,name\n").expect("write template");
    *h.api.download.lock().expect("lock") = b"1,widget\n".to_vec();
    let recorder = Recorder::default();
    h.engine.define_command(import(recorder.clone())).await.expect("command registers");

    let run = h.engine.handle_message(text(1, "/import")).await.expect("command triggered");
    until_waiting(&h.engine).await;
    h.engine
        .handle_message(IncomingMessage::document(CHAT, MessageId(2), csv_attachment()))
        .await;

    assert!(matches!(
        run.await.expect("dispatch task"),
        DispatchOutcome::Failed(CommandError::Store(StoreError::Backend(_)))
    ));
    assert!(recorder.runs().is_empty());
    let leftovers = std::fs::read_dir(h.temp.path()).expect("temp dir readable").count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn test_text_reply_to_file_argument_aborts() {
    let h = harness();
    std::fs::write(h.documents.path().join("import.csv"), "id,name\n").expect("write template");
    let recorder = Recorder::default();
    h.engine.define_command(import(recorder.clone())).await.expect("command registers");

    let run = h.engine.handle_message(text(1, "/import")).await.expect("command triggered");
    until_waiting(&h.engine).await;
    h.engine.handle_message(text(2, "here you go")).await;

    assert!(matches!(
        run.await.expect("dispatch task"),
        DispatchOutcome::Failed(CommandError::MissingAttachment(_))
    ));
    assert!(recorder.runs().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_argument_times_out() {
    let h = harness_with(Default::default(), Some(Duration::from_secs(30)));
    let recorder = Recorder::default();
    h.engine.define_command(report(recorder.clone())).await.expect("command registers");

    let outcome = h.engine.dispatch("report", text(1, "/report"), None).await;

    match outcome {
        DispatchOutcome::Failed(CommandError::TimedOut(name, limit)) => {
            assert_eq!(name, "title");
            assert_eq!(limit, Duration::from_secs(30));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(h.engine.pending_replies(CHAT), 0);
}

#[tokio::test]
async fn test_default_handler_sends_rendered_template() {
    let h = harness();
    std::fs::write(
        h.documents.path().join("pricing.md"),
        "Plan: {{ plan.name }}",
    )
    .expect("write template");
    h.engine
        .define_command(
            CommandDefinition::new("pricing", "Current prices")
                .data(json!({"plan": {"name": "Pro"}})),
        )
        .await
        .expect("command registers");

    let outcome = h.engine.dispatch("pricing", text(1, "/pricing"), None).await;

    assert!(matches!(outcome, DispatchOutcome::Completed));
    let calls = h.api.calls();
    let Sent::Document(_, document, _) = &calls[0] else {
        panic!("expected document, got {calls:?}");
    };
    assert_eq!(document.file_name, "pricing.md");
    assert_eq!(document.bytes, b"Plan: Pro".to_vec());
}

#[tokio::test]
async fn test_help_and_menu_sync() {
    let h = harness();
    h.engine.define_command(report(Recorder::default())).await.expect("command registers");
    builtin::register(&h.engine).await.expect("help registers");

    h.engine.sync_commands(3).await.expect("menu published");
    let menus = h.api.menus.lock().expect("lock").clone();
    assert_eq!(
        menus,
        vec![vec![
            ("help".to_string(), "List available commands".to_string()),
            ("report".to_string(), "Monthly report".to_string()),
        ]]
    );

    let outcome = h.engine.dispatch("help", text(1, "/help"), None).await;
    assert!(matches!(outcome, DispatchOutcome::Completed));
    let texts = h.api.texts();
    assert!(texts[0].contains("/report - Monthly report"));
}

#[tokio::test]
async fn test_unknown_command_is_ignored() {
    let h = harness();
    assert!(h.engine.handle_message(text(1, "/nothing")).await.is_none());
    assert!(matches!(
        h.engine.dispatch("nothing", text(1, "/nothing"), None).await,
        DispatchOutcome::Unknown
    ));
}
