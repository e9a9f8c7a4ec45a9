#[cfg(test)]
mod tests {
    use crate::attachments::ingest;
    use crate::cancel::CancelToken;
    use crate::decoder::{decode_stream, StreamDecoder};
    use crate::event_bus::EventBus;
    use crate::orchestrator::{build_request, wire_history, ChatOrchestrator, TurnOutcome, TurnPhase};
    use crate::ports::*;
    use crate::store::SessionStore;
    use chat_types::attachment::{Attachment, MAX_ATTACHMENT_BYTES};
    use chat_types::config::{ChatConfig, ChatSettings, ThinkingMode};
    use chat_types::event::{ChatEvent, DeltaKind};
    use chat_types::message::*;
    use chat_types::session::DEFAULT_TITLE;
    use chat_types::thinking::{StreamDelta, THINKING_END, THINKING_START};
    use chat_types::wire::{MessagesRequest, ThinkingParam};
    use chat_types::ChatError;
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;
    use std::rc::Rc;
    use async_trait::async_trait;
    use futures::channel::mpsc;
    use futures::executor::{block_on, LocalPool};
    use futures::stream::{self, StreamExt};
    use futures::task::LocalSpawnExt;
    use serde_json::json;

    // ─── Fixtures ────────────────────────────────────────────

    fn record(event: serde_json::Value) -> String {
        format!("event: {}\ndata: {}\n\n", event["type"].as_str().unwrap_or(""), event)
    }

    fn text_delta(text: &str) -> String {
        record(json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": { "type": "text_delta", "text": text }
        }))
    }

    fn thinking_delta(text: &str) -> String {
        record(json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": { "type": "thinking_delta", "thinking": text }
        }))
    }

    fn block_start(kind: &str) -> String {
        record(json!({
            "type": "content_block_start",
            "index": 0,
            "content_block": { "type": kind, "text": "" }
        }))
    }

    fn block_stop() -> String {
        record(json!({ "type": "content_block_stop", "index": 0 }))
    }

    fn error_event(message: &str) -> String {
        record(json!({
            "type": "error",
            "error": { "type": "overloaded_error", "message": message }
        }))
    }

    /// A typical reasoning response: one thinking block, then the answer.
    fn reasoning_body() -> String {
        [
            record(json!({ "type": "message_start", "message": { "id": "msg_1", "content": [] } })),
            block_start("thinking"),
            thinking_delta("Let me "),
            thinking_delta("think."),
            block_stop(),
            block_start("text"),
            text_delta("Héllo "),
            text_delta("wörld 🌍"),
            block_stop(),
            record(json!({ "type": "message_delta", "delta": { "stop_reason": "end_turn" } })),
            record(json!({ "type": "message_stop" })),
            "data: [DONE]\n\n".to_string(),
        ]
        .concat()
    }

    fn decode_all(chunks: Vec<Vec<u8>>) -> (Vec<StreamDelta>, Option<ChatError>) {
        let mut decoder = StreamDecoder::new();
        let mut deltas = Vec::new();
        for chunk in chunks {
            decoder.push(&chunk);
            while let Some(d) = decoder.pop() {
                deltas.push(d);
            }
        }
        decoder.finish();
        while let Some(d) = decoder.pop() {
            deltas.push(d);
        }
        (deltas, decoder.take_error())
    }

    fn concat(deltas: &[StreamDelta]) -> String {
        deltas.iter().map(StreamDelta::fragment).collect()
    }

    // ─── Mock Ports ──────────────────────────────────────────

    #[derive(Default)]
    struct MemoryStorage {
        data: RefCell<HashMap<String, Vec<u8>>>,
        writes: Cell<usize>,
    }

    #[async_trait(?Send)]
    impl StoragePort for MemoryStorage {
        async fn get(&self, key: &str) -> chat_types::Result<Option<Vec<u8>>> {
            Ok(self.data.borrow().get(key).cloned())
        }

        async fn set(&self, key: &str, value: &[u8]) -> chat_types::Result<()> {
            self.writes.set(self.writes.get() + 1);
            self.data.borrow_mut().insert(key.to_string(), value.to_vec());
            Ok(())
        }

        async fn delete(&self, key: &str) -> chat_types::Result<()> {
            self.data.borrow_mut().remove(key);
            Ok(())
        }

        fn backend_name(&self) -> &str {
            "mock"
        }
    }

    /// LLM that replays a canned response, chunked as given
    struct ScriptedLlm {
        response: chat_types::Result<Vec<Vec<u8>>>,
        requests: RefCell<Vec<MessagesRequest>>,
    }

    impl ScriptedLlm {
        fn replying(body: &str) -> Rc<Self> {
            Self::chunked(vec![body.as_bytes().to_vec()])
        }

        fn chunked(chunks: Vec<Vec<u8>>) -> Rc<Self> {
            Rc::new(Self {
                response: Ok(chunks),
                requests: RefCell::new(Vec::new()),
            })
        }

        fn failing(error: ChatError) -> Rc<Self> {
            Rc::new(Self {
                response: Err(error),
                requests: RefCell::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.requests.borrow().len()
        }
    }

    #[async_trait(?Send)]
    impl LlmPort for ScriptedLlm {
        async fn stream_messages(&self, req: MessagesRequest) -> chat_types::Result<ByteStream> {
            self.requests.borrow_mut().push(req);
            let chunks = self.response.clone()?;
            Ok(Box::pin(stream::iter(chunks.into_iter().map(Ok))))
        }
    }

    /// LLM whose response body is fed by the test through a channel
    struct ChannelLlm {
        body: RefCell<Option<mpsc::UnboundedReceiver<chat_types::Result<Vec<u8>>>>>,
    }

    impl ChannelLlm {
        fn new() -> (Rc<Self>, mpsc::UnboundedSender<chat_types::Result<Vec<u8>>>) {
            let (tx, rx) = mpsc::unbounded();
            (Rc::new(Self { body: RefCell::new(Some(rx)) }), tx)
        }
    }

    #[async_trait(?Send)]
    impl LlmPort for ChannelLlm {
        async fn stream_messages(&self, _req: MessagesRequest) -> chat_types::Result<ByteStream> {
            let rx = self
                .body
                .borrow_mut()
                .take()
                .ok_or_else(|| ChatError::Other("body already taken".to_string()))?;
            Ok(Box::pin(rx))
        }
    }

    struct MockFile {
        name: String,
        size: u64,
        media_type: String,
        bytes: Option<Vec<u8>>,
    }

    impl MockFile {
        fn text(name: &str, body: &str) -> Rc<dyn FileSource> {
            Rc::new(Self {
                name: name.to_string(),
                size: body.len() as u64,
                media_type: "text/plain".to_string(),
                bytes: Some(body.as_bytes().to_vec()),
            })
        }

        fn image(name: &str, bytes: &[u8]) -> Rc<dyn FileSource> {
            Rc::new(Self {
                name: name.to_string(),
                size: bytes.len() as u64,
                media_type: "image/png".to_string(),
                bytes: Some(bytes.to_vec()),
            })
        }

        /// Reports `size` without holding the bytes
        fn sized(name: &str, size: u64) -> Rc<dyn FileSource> {
            Rc::new(Self {
                name: name.to_string(),
                size,
                media_type: "application/octet-stream".to_string(),
                bytes: Some(Vec::new()),
            })
        }

        fn unreadable(name: &str) -> Rc<dyn FileSource> {
            Rc::new(Self {
                name: name.to_string(),
                size: 10,
                media_type: "text/plain".to_string(),
                bytes: None,
            })
        }
    }

    #[async_trait(?Send)]
    impl FileSource for MockFile {
        fn name(&self) -> String {
            self.name.clone()
        }

        fn size(&self) -> u64 {
            self.size
        }

        fn media_type(&self) -> String {
            self.media_type.clone()
        }

        async fn read_bytes(&self) -> chat_types::Result<Vec<u8>> {
            self.bytes
                .clone()
                .ok_or_else(|| ChatError::JsInterop("NotReadableError".to_string()))
        }
    }

    struct Harness {
        orchestrator: ChatOrchestrator,
        storage: Rc<MemoryStorage>,
        bus: EventBus,
    }

    fn harness(llm: Rc<dyn LlmPort>) -> Harness {
        let storage = Rc::new(MemoryStorage::default());
        let bus = EventBus::new();
        let store = SessionStore::new(storage.clone(), "chat_sessions", bus.clone());
        let orchestrator = ChatOrchestrator::new(
            &ChatConfig::default(),
            Rc::new(RefCell::new(store)),
            llm,
            bus.clone(),
        );
        Harness {
            orchestrator,
            storage,
            bus,
        }
    }

    fn new_store() -> (SessionStore, Rc<MemoryStorage>, EventBus) {
        let storage = Rc::new(MemoryStorage::default());
        let bus = EventBus::new();
        (SessionStore::new(storage.clone(), "chat_sessions", bus.clone()), storage, bus)
    }

    // ─── EventBus Tests ──────────────────────────────────────

    #[test]
    fn test_event_bus_new_is_empty() {
        let bus = EventBus::new();
        assert!(!bus.has_pending());
        assert!(bus.drain().is_empty());
    }

    #[test]
    fn test_event_bus_emit_and_drain() {
        let bus = EventBus::new();
        bus.emit(ChatEvent::SessionsChanged);
        bus.emit(ChatEvent::TurnCompleted { turn_id: 1 });
        assert!(bus.has_pending());

        let events = bus.drain();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], ChatEvent::TurnCompleted { turn_id: 1 });
        assert!(!bus.has_pending());
    }

    #[test]
    fn test_event_bus_clone_shares_state() {
        let bus1 = EventBus::new();
        let bus2 = bus1.clone();
        bus1.emit(ChatEvent::SessionsChanged);
        assert!(bus2.has_pending());
        assert_eq!(bus2.drain().len(), 1);
        assert!(!bus1.has_pending());
    }

    #[test]
    fn test_event_bus_waker_called_per_emit() {
        let bus = EventBus::new();
        let wakes = Rc::new(Cell::new(0));
        let counter = wakes.clone();
        bus.set_waker(move || counter.set(counter.get() + 1));

        bus.emit(ChatEvent::SessionsChanged);
        bus.emit(ChatEvent::SessionsChanged);
        assert_eq!(wakes.get(), 2);

        bus.clear_waker();
        bus.emit(ChatEvent::SessionsChanged);
        assert_eq!(wakes.get(), 2);
    }

    #[test]
    fn test_event_bus_waker_may_drain() {
        let bus = EventBus::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let (inner, sink) = (bus.clone(), seen.clone());
        bus.set_waker(move || sink.borrow_mut().extend(inner.drain()));

        bus.emit(ChatEvent::AttachmentsChanged { count: 2 });
        assert_eq!(seen.borrow().len(), 1);
        assert!(!bus.has_pending());
    }

    // ─── CancelToken Tests ───────────────────────────────────

    #[test]
    fn test_cancel_token_run_completes() {
        let token = CancelToken::new();
        let out = block_on(token.run(async { 42 }));
        assert_eq!(out, Ok(42));
    }

    #[test]
    fn test_cancel_token_cancel_before_run() {
        let token = CancelToken::new();
        token.cancel();
        assert!(token.is_cancelled());
        assert!(block_on(token.run(futures::future::pending::<()>())).is_err());
    }

    #[test]
    fn test_cancel_token_ends_guarded_stream() {
        let token = CancelToken::new();
        let (tx, rx) = mpsc::unbounded::<u32>();
        let mut guarded = token.guard(rx);

        tx.unbounded_send(1).unwrap();
        assert_eq!(block_on(guarded.next()), Some(1));

        token.cancel();
        tx.unbounded_send(2).unwrap();
        assert_eq!(block_on(guarded.next()), None);
    }

    #[test]
    fn test_cancel_token_idempotent() {
        let token = CancelToken::new();
        let clone = token.clone();
        token.cancel();
        clone.cancel();
        assert!(clone.is_cancelled());
    }

    // ─── StreamDecoder Tests ─────────────────────────────────

    #[test]
    fn test_decoder_reasoning_response() {
        let (deltas, err) = decode_all(vec![reasoning_body().into_bytes()]);
        assert!(err.is_none());
        assert_eq!(
            deltas,
            vec![
                StreamDelta::ThinkingStart,
                StreamDelta::Thinking("Let me ".into()),
                StreamDelta::Thinking("think.".into()),
                StreamDelta::ThinkingEnd,
                StreamDelta::Text("Héllo ".into()),
                StreamDelta::Text("wörld 🌍".into()),
            ]
        );
        assert_eq!(
            concat(&deltas),
            format!("{}Let me think.{}Héllo wörld 🌍", THINKING_START, THINKING_END)
        );
    }

    #[test]
    fn test_decoder_chunk_boundary_invariance() {
        let body = reasoning_body().into_bytes();
        let (expected, _) = decode_all(vec![body.clone()]);

        // Every two-way split, including ones inside multi-byte characters
        for cut in 0..=body.len() {
            let (deltas, err) = decode_all(vec![body[..cut].to_vec(), body[cut..].to_vec()]);
            assert!(err.is_none());
            assert_eq!(deltas, expected, "split at byte {}", cut);
        }

        // One byte at a time
        let (deltas, _) = decode_all(body.iter().map(|b| vec![*b]).collect());
        assert_eq!(deltas, expected);
    }

    #[test]
    fn test_decoder_utf8_split_across_chunks() {
        let body = text_delta("🌍").into_bytes();
        let pos = body
            .windows(4)
            .position(|w| w == "🌍".as_bytes())
            .unwrap();
        let (deltas, _) = decode_all(vec![body[..pos + 2].to_vec(), body[pos + 2..].to_vec()]);
        assert_eq!(deltas, vec![StreamDelta::Text("🌍".into())]);
    }

    #[test]
    fn test_decoder_skips_malformed_records() {
        let body = format!("data: {{not json\n\n{}data: \n\n: keepalive\n\n", text_delta("ok"));
        let (deltas, err) = decode_all(vec![body.into_bytes()]);
        assert!(err.is_none());
        assert_eq!(deltas, vec![StreamDelta::Text("ok".into())]);
    }

    #[test]
    fn test_decoder_ignores_unknown_events() {
        let body = [
            record(json!({ "type": "ping" })),
            record(json!({ "type": "content_block_delta", "delta": { "type": "signature_delta", "signature": "x" } })),
            text_delta("a"),
        ]
        .concat();
        let (deltas, _) = decode_all(vec![body.into_bytes()]);
        assert_eq!(deltas, vec![StreamDelta::Text("a".into())]);
    }

    #[test]
    fn test_decoder_data_prefix_without_space_and_crlf() {
        let body = "data:{\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"x\"}}\r\n\r\n";
        let (deltas, _) = decode_all(vec![body.as_bytes().to_vec()]);
        assert_eq!(deltas, vec![StreamDelta::Text("x".into())]);
    }

    #[test]
    fn test_decoder_final_line_without_newline() {
        let body = text_delta("tail");
        let trimmed = body.trim_end_matches('\n');
        let (deltas, _) = decode_all(vec![trimmed.as_bytes().to_vec()]);
        assert_eq!(deltas, vec![StreamDelta::Text("tail".into())]);
    }

    #[test]
    fn test_decoder_message_start_initial_text() {
        let body = record(json!({
            "type": "message_start",
            "message": { "content": [{ "type": "text", "text": "Hi" }] }
        }));
        let (deltas, _) = decode_all(vec![body.into_bytes()]);
        assert_eq!(deltas, vec![StreamDelta::Text("Hi".into())]);
    }

    #[test]
    fn test_decoder_error_event_ends_stream() {
        let body = [text_delta("partial"), error_event("Overloaded"), text_delta("ignored")].concat();
        let (deltas, err) = decode_all(vec![body.into_bytes()]);
        assert_eq!(deltas, vec![StreamDelta::Text("partial".into())]);
        assert_eq!(err, Some(ChatError::Stream("Overloaded".into())));
    }

    #[test]
    fn test_decoder_error_event_without_message() {
        let body = record(json!({ "type": "error" }));
        let (_, err) = decode_all(vec![body.into_bytes()]);
        assert_eq!(err, Some(ChatError::Stream("Unknown stream error".into())));
    }

    #[test]
    fn test_decoder_single_thinking_region() {
        let body = [
            block_start("thinking"),
            thinking_delta("first"),
            block_stop(),
            block_start("text"),
            text_delta("mid"),
            block_stop(),
            block_start("thinking"),
            thinking_delta("second"),
            block_stop(),
            block_start("text"),
            text_delta(" end"),
        ]
        .concat();
        let (deltas, _) = decode_all(vec![body.into_bytes()]);
        let text = concat(&deltas);
        assert_eq!(text.matches(THINKING_START).count(), 1);
        assert_eq!(text.matches(THINKING_END).count(), 1);
        assert!(!text.contains("second"));
        assert!(text.ends_with("mid end"));
    }

    #[test]
    fn test_decoder_thinking_delta_without_block_start_dropped() {
        let body = [thinking_delta("stray"), text_delta("a")].concat();
        let (deltas, _) = decode_all(vec![body.into_bytes()]);
        assert_eq!(deltas, vec![StreamDelta::Text("a".into())]);
    }

    #[test]
    fn test_decoder_text_block_closes_open_thinking() {
        let body = [block_start("thinking"), thinking_delta("t"), block_start("text"), text_delta("a")].concat();
        let (deltas, _) = decode_all(vec![body.into_bytes()]);
        assert_eq!(
            deltas,
            vec![
                StreamDelta::ThinkingStart,
                StreamDelta::Thinking("t".into()),
                StreamDelta::ThinkingEnd,
                StreamDelta::Text("a".into()),
            ]
        );
    }

    #[test]
    fn test_decode_stream_yields_then_errors() {
        let chunks = vec![
            Ok(text_delta("one").into_bytes()),
            Err(ChatError::network("connection reset")),
            Ok(text_delta("never").into_bytes()),
        ];
        let items: Vec<_> = block_on(decode_stream(stream::iter(chunks)).collect());
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], Ok(StreamDelta::Text("one".into())));
        assert!(matches!(items[1], Err(ChatError::Network(_))));
    }

    #[test]
    fn test_decode_stream_error_event_is_last_item() {
        let body = [text_delta("a"), error_event("boom")].concat();
        let items: Vec<_> = block_on(decode_stream(stream::iter(vec![Ok(body.into_bytes())])).collect());
        assert_eq!(
            items,
            vec![Ok(StreamDelta::Text("a".into())), Err(ChatError::Stream("boom".into()))]
        );
    }

    // ─── Attachment Ingestion Tests ──────────────────────────

    #[test]
    fn test_ingest_text_and_image() {
        let report = block_on(ingest(vec![
            MockFile::text("notes.md", "# Notes"),
            MockFile::image("dot.png", &[0x89, b'P', b'N', b'G']),
        ]));
        assert!(report.rejected.is_empty());
        assert_eq!(
            report.attachments,
            vec![
                Attachment::Text {
                    name: "notes.md".into(),
                    data: "# Notes".into()
                },
                Attachment::Image {
                    name: "dot.png".into(),
                    media_type: "image/png".into(),
                    data: "iVBORw==".into()
                },
            ]
        );
    }

    #[test]
    fn test_ingest_rejects_only_oversized_file() {
        let report = block_on(ingest(vec![
            MockFile::sized("big.bin", 6 * 1024 * 1024),
            MockFile::text("small.txt", "fits"),
        ]));
        assert_eq!(report.attachments.len(), 1);
        assert_eq!(report.attachments[0].name(), "small.txt");
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].name, "big.bin");
        assert!(report.rejected[0].reason.contains("too large"));
    }

    #[test]
    fn test_ingest_limit_is_inclusive() {
        let report = block_on(ingest(vec![MockFile::sized("exact.bin", MAX_ATTACHMENT_BYTES)]));
        assert_eq!(report.attachments.len(), 1);
        assert!(report.rejected.is_empty());
    }

    #[test]
    fn test_ingest_unreadable_file_reported() {
        let report = block_on(ingest(vec![MockFile::unreadable("locked.txt"), MockFile::text("ok.txt", "x")]));
        assert_eq!(report.attachments.len(), 1);
        assert_eq!(report.rejected[0].name, "locked.txt");
    }

    #[test]
    fn test_ingest_invalid_utf8_is_lossy() {
        let file: Rc<dyn FileSource> = Rc::new(MockFile {
            name: "bin.txt".into(),
            size: 3,
            media_type: String::new(),
            bytes: Some(vec![b'a', 0xff, b'b']),
        });
        let report = block_on(ingest(vec![file]));
        assert_eq!(
            report.attachments[0],
            Attachment::Text {
                name: "bin.txt".into(),
                data: "a\u{fffd}b".into()
            }
        );
    }

    // ─── SessionStore Tests ──────────────────────────────────

    #[test]
    fn test_store_new_session_is_current_and_first() {
        let (mut store, _, bus) = new_store();
        let a = store.new_session();
        let b = store.new_session();
        assert_eq!(store.current_id(), Some(b.as_str()));
        assert_eq!(store.sessions()[0].id, b);
        assert_eq!(store.sessions()[1].id, a);
        assert_eq!(store.get(&b).unwrap().title, DEFAULT_TITLE);
        assert!(bus.drain().contains(&ChatEvent::SessionsChanged));
    }

    #[test]
    fn test_store_first_user_message_sets_title() {
        let (mut store, _, _) = new_store();
        let id = store.new_session();
        store.append_message(&id, Message::user("What is the capital of France, and why?"));
        store.append_message(&id, Message::user("Second question"));
        assert_eq!(store.get(&id).unwrap().title, "What is the capital of France,...");
    }

    #[test]
    fn test_store_short_title_not_truncated() {
        let (mut store, _, _) = new_store();
        let id = store.new_session();
        store.append_message(&id, Message::user("Hello"));
        assert_eq!(store.get(&id).unwrap().title, "Hello");
    }

    #[test]
    fn test_store_delete_only_session_creates_fresh_one() {
        let (mut store, _, _) = new_store();
        let id = store.new_session();
        store.append_message(&id, Message::user("hi"));

        assert!(store.delete_session(&id));
        assert_eq!(store.sessions().len(), 1);
        let current = store.current().unwrap();
        assert_ne!(current.id, id);
        assert!(current.messages.is_empty());
        assert_eq!(current.title, DEFAULT_TITLE);
    }

    #[test]
    fn test_store_delete_current_selects_next() {
        let (mut store, _, _) = new_store();
        let older = store.new_session();
        let newer = store.new_session();
        assert!(store.delete_session(&newer));
        assert_eq!(store.current_id(), Some(older.as_str()));
    }

    #[test]
    fn test_store_delete_unknown_is_noop() {
        let (mut store, _, _) = new_store();
        store.new_session();
        assert!(!store.delete_session("missing"));
        assert_eq!(store.sessions().len(), 1);
    }

    #[test]
    fn test_store_select_unknown_keeps_current() {
        let (mut store, _, _) = new_store();
        let id = store.new_session();
        assert!(!store.select_session("missing"));
        assert_eq!(store.current_id(), Some(id.as_str()));
    }

    #[test]
    fn test_store_patch_message() {
        let (mut store, _, _) = new_store();
        let id = store.new_session();
        let msg = Message::placeholder();
        let msg_id = msg.id().to_string();
        store.append_message(&id, msg);

        assert!(store.patch_message(&id, &msg_id, |m| m.content.push_str("hey")));
        assert_eq!(store.message(&id, &msg_id).unwrap().content.as_text(), "hey");
        assert!(!store.patch_message(&id, "missing", |_| {}));
    }

    #[test]
    fn test_store_save_and_load_round_trip() {
        let (mut store, storage, _) = new_store();
        let id = store.new_session();
        store.append_message(&id, Message::user("persist me"));
        block_on(store.save());

        let restored = block_on(SessionStore::load(storage.clone(), "chat_sessions", EventBus::new()));
        assert_eq!(restored.sessions(), store.sessions());
        assert_eq!(restored.current_id(), Some(id.as_str()));
    }

    #[test]
    fn test_store_load_corrupt_data_starts_fresh() {
        let storage = Rc::new(MemoryStorage::default());
        storage
            .data
            .borrow_mut()
            .insert("chat_sessions".into(), b"{not a list".to_vec());
        let store = block_on(SessionStore::load(storage, "chat_sessions", EventBus::new()));
        assert_eq!(store.sessions().len(), 1);
        assert!(store.current_messages().is_empty());
    }

    // ─── Request Building Tests ──────────────────────────────

    #[test]
    fn test_wire_history_strips_thinking_and_skips_empty() {
        let mut failed = Message::placeholder();
        failed.fail("boom");
        let history = wire_history(&[
            Message::user("q1"),
            Message::assistant(format!("{}reasoning{}answer", THINKING_START, THINKING_END)),
            Message::user("q2"),
            Message::assistant(format!("{}only thinking", THINKING_START)),
            failed,
            Message::user("q3"),
        ]);
        let roles: Vec<Role> = history.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User, Role::User]);
        assert_eq!(history[1].content, MessageContent::Text("answer".into()));
    }

    #[test]
    fn test_build_request_uses_settings() {
        let settings = ChatSettings {
            model: "claude-sonnet-4-5".into(),
            thinking_mode: ThinkingMode::Deep,
        };
        let req = build_request(&settings, "be brief", vec![]);
        assert!(req.stream);
        assert_eq!(req.model, "claude-sonnet-4-5");
        assert_eq!(req.system, "be brief");
        assert!(matches!(req.thinking, Some(ThinkingParam::Enabled { .. })));

        let plain = build_request(
            &ChatSettings {
                model: "gpt-5".into(),
                thinking_mode: ThinkingMode::Deep,
            },
            "",
            vec![],
        );
        assert!(plain.thinking.is_none());
    }

    // ─── Orchestrator Tests ──────────────────────────────────

    #[test]
    fn test_orchestrator_initial_state() {
        let h = harness(ScriptedLlm::replying(""));
        assert_eq!(h.orchestrator.phase(), TurnPhase::Idle);
        assert!(!h.orchestrator.is_loading());
        assert!(h.orchestrator.messages().is_empty());
    }

    #[test]
    fn test_send_empty_input_does_nothing() {
        let llm = ScriptedLlm::replying(&text_delta("x"));
        let h = harness(llm.clone());
        h.orchestrator.set_input("   \n ");

        let outcome = block_on(h.orchestrator.send_turn());
        assert_eq!(outcome, TurnOutcome::Skipped);
        assert_eq!(llm.calls(), 0);
        assert!(h.orchestrator.messages().is_empty());
        assert_eq!(h.storage.writes.get(), 0);
    }

    #[test]
    fn test_send_turn_streams_reply() {
        let llm = ScriptedLlm::replying(&reasoning_body());
        let h = harness(llm.clone());
        h.orchestrator.set_input("  Hi there  ");

        let outcome = block_on(h.orchestrator.send_turn());
        assert_eq!(outcome, TurnOutcome::Completed);
        assert!(!h.orchestrator.is_loading());
        assert!(h.orchestrator.input().is_empty());

        let messages = h.orchestrator.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role(), Role::User);
        assert_eq!(messages[0].content, MessageContent::Text("Hi there".into()));
        assert_eq!(messages[1].role(), Role::Assistant);
        assert!(!messages[1].is_error);
        assert_eq!(messages[1].copy_text(), "Héllo wörld 🌍");
        assert!(messages[1].content.as_text().starts_with(THINKING_START));

        let requests = llm.requests.borrow();
        assert_eq!(requests[0].messages.len(), 1);
        assert_eq!(requests[0].messages[0].content, MessageContent::Text("Hi there".into()));

        let store = h.orchestrator.store();
        assert_eq!(store.borrow().current().unwrap().title, "Hi there");
    }

    #[test]
    fn test_send_turn_event_order() {
        let h = harness(ScriptedLlm::replying(&[text_delta("a"), text_delta("b")].concat()));
        h.orchestrator.set_input("go");
        block_on(h.orchestrator.send_turn());

        let events: Vec<ChatEvent> = h
            .bus
            .drain()
            .into_iter()
            .filter(|e| !matches!(e, ChatEvent::SessionsChanged | ChatEvent::MessagesChanged { .. }))
            .collect();
        assert!(matches!(events[0], ChatEvent::TurnStarted { turn_id: 1, .. }));
        assert!(matches!(events[1], ChatEvent::Delta { kind: DeltaKind::Text, .. }));
        assert!(matches!(events[2], ChatEvent::Delta { kind: DeltaKind::Text, .. }));
        assert_eq!(events[3], ChatEvent::TurnCompleted { turn_id: 1 });
        assert_eq!(events.len(), 4);
    }

    #[test]
    fn test_send_turn_persists_transcript() {
        let h = harness(ScriptedLlm::replying(&text_delta("saved")));
        h.orchestrator.set_input("q");
        block_on(h.orchestrator.send_turn());

        let restored = block_on(SessionStore::load(h.storage.clone(), "chat_sessions", EventBus::new()));
        let messages = restored.current_messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content.as_text(), "saved");
    }

    #[test]
    fn test_history_excludes_thinking_on_next_turn() {
        let llm = ScriptedLlm::replying(&reasoning_body());
        let h = harness(llm.clone());
        h.orchestrator.set_input("first");
        block_on(h.orchestrator.send_turn());
        h.orchestrator.set_input("second");
        block_on(h.orchestrator.send_turn());

        let requests = llm.requests.borrow();
        let history = &requests[1].messages;
        assert_eq!(history.len(), 3);
        assert_eq!(history[1].content, MessageContent::Text("Héllo wörld 🌍".into()));
    }

    #[test]
    fn test_http_error_marks_placeholder() {
        let h = harness(ScriptedLlm::failing(ChatError::Http {
            status: 401,
            message: "invalid x-api-key".into(),
        }));
        h.orchestrator.set_input("hi");

        let outcome = block_on(h.orchestrator.send_turn());
        assert_eq!(outcome, TurnOutcome::Errored("invalid x-api-key".into()));

        let messages = h.orchestrator.messages();
        assert_eq!(messages.len(), 2);
        assert!(messages[1].is_error);
        assert_eq!(messages[1].content.as_text(), "Error: invalid x-api-key");
        assert!(!h.orchestrator.is_loading());
        assert!(h
            .bus
            .drain()
            .iter()
            .any(|e| matches!(e, ChatEvent::TurnFailed { .. })));
    }

    #[test]
    fn test_stream_error_replaces_partial_content() {
        let h = harness(ScriptedLlm::replying(&[text_delta("partial"), error_event("Overloaded")].concat()));
        h.orchestrator.set_input("hi");

        let outcome = block_on(h.orchestrator.send_turn());
        assert_eq!(outcome, TurnOutcome::Errored("Overloaded".into()));
        let reply = &h.orchestrator.messages()[1];
        assert!(reply.is_error);
        assert_eq!(reply.content.as_text(), "Error: Overloaded");
    }

    #[test]
    fn test_attachments_sent_as_blocks() {
        let llm = ScriptedLlm::replying(&text_delta("seen"));
        let h = harness(llm.clone());
        let report = block_on(h.orchestrator.add_files(vec![
            MockFile::image("a.png", &[1, 2, 3]),
            MockFile::text("b.txt", "body"),
        ]));
        assert_eq!(report.attachments.len(), 2);
        h.orchestrator.set_input("Describe these");

        block_on(h.orchestrator.send_turn());
        assert!(h.orchestrator.attachments().is_empty());

        let user = &h.orchestrator.messages()[0];
        let MessageContent::Blocks(blocks) = &user.content else {
            panic!("expected block content");
        };
        assert_eq!(blocks.len(), 3);
        assert!(matches!(blocks[0], ContentBlock::Image { .. }));
        assert_eq!(blocks[1], ContentBlock::text("<file name=\"b.txt\">\nbody\n</file>"));
        assert_eq!(blocks[2], ContentBlock::text("Describe these"));

        let store = h.orchestrator.store();
        assert_eq!(store.borrow().current().unwrap().title, "Describe these");
    }

    #[test]
    fn test_attachment_only_send() {
        let h = harness(ScriptedLlm::replying(&text_delta("ok")));
        block_on(h.orchestrator.add_files(vec![MockFile::text("only.txt", "data")]));
        assert_eq!(block_on(h.orchestrator.send_turn()), TurnOutcome::Completed);
        let MessageContent::Blocks(blocks) = &h.orchestrator.messages()[0].content else {
            panic!("expected block content");
        };
        assert_eq!(blocks.len(), 1);
    }

    #[test]
    fn test_add_files_emits_rejection() {
        let h = harness(ScriptedLlm::replying(""));
        block_on(h.orchestrator.add_files(vec![
            MockFile::sized("huge.iso", 6 * 1024 * 1024),
            MockFile::sized("small.bin", 1024 * 1024),
        ]));
        assert_eq!(h.orchestrator.attachments().len(), 1);

        let events = h.bus.drain();
        assert!(events.iter().any(|e| matches!(e, ChatEvent::AttachmentRejected { name, .. } if name == "huge.iso")));
        assert!(events.contains(&ChatEvent::AttachmentsChanged { count: 1 }));
    }

    #[test]
    fn test_remove_attachment() {
        let h = harness(ScriptedLlm::replying(""));
        block_on(h.orchestrator.add_files(vec![MockFile::text("a", "1"), MockFile::text("b", "2")]));
        let removed = h.orchestrator.remove_attachment(0).unwrap();
        assert_eq!(removed.name(), "a");
        assert_eq!(h.orchestrator.attachments().len(), 1);
        assert!(h.orchestrator.remove_attachment(5).is_none());
    }

    #[test]
    fn test_set_model_applies_to_next_request() {
        let llm = ScriptedLlm::replying(&text_delta("x"));
        let h = harness(llm.clone());
        h.orchestrator.set_model("claude-haiku-4-5");
        h.orchestrator.set_thinking_mode(ThinkingMode::Deep);
        h.orchestrator.set_input("hi");
        block_on(h.orchestrator.send_turn());

        assert_eq!(llm.requests.borrow()[0].model, "claude-haiku-4-5");
        assert_eq!(h.orchestrator.settings().thinking_mode, ThinkingMode::Deep);
    }

    #[test]
    fn test_stop_keeps_partial_content() {
        let (llm, tx) = ChannelLlm::new();
        let h = harness(llm);
        h.orchestrator.set_input("tell me");

        let mut pool = LocalPool::new();
        let outcome = Rc::new(RefCell::new(None));
        {
            let orchestrator = h.orchestrator.clone();
            let outcome = outcome.clone();
            pool.spawner()
                .spawn_local(async move {
                    *outcome.borrow_mut() = Some(orchestrator.send_turn().await);
                })
                .unwrap();
        }

        tx.unbounded_send(Ok(text_delta("Hel").into_bytes())).unwrap();
        tx.unbounded_send(Ok(text_delta("lo").into_bytes())).unwrap();
        pool.run_until_stalled();
        assert_eq!(h.orchestrator.phase(), TurnPhase::Streaming);
        assert_eq!(h.orchestrator.messages()[1].content.as_text(), "Hello");

        h.orchestrator.stop_turn();
        assert!(!h.orchestrator.is_loading());

        let _ = tx.unbounded_send(Ok(text_delta(" world").into_bytes()));
        pool.run_until_stalled();

        assert_eq!(*outcome.borrow(), Some(TurnOutcome::Cancelled));
        let reply = &h.orchestrator.messages()[1];
        assert_eq!(reply.content.as_text(), "Hello");
        assert!(!reply.is_error);
        assert!(h
            .bus
            .drain()
            .contains(&ChatEvent::TurnCancelled { turn_id: 1 }));
    }

    #[test]
    fn test_send_while_loading_acts_as_stop() {
        let (llm, tx) = ChannelLlm::new();
        let h = harness(llm);
        h.orchestrator.set_input("first");

        let mut pool = LocalPool::new();
        {
            let orchestrator = h.orchestrator.clone();
            pool.spawner()
                .spawn_local(async move {
                    orchestrator.send_turn().await;
                })
                .unwrap();
        }
        tx.unbounded_send(Ok(text_delta("partial").into_bytes())).unwrap();
        pool.run_until_stalled();
        assert!(h.orchestrator.is_loading());

        h.orchestrator.set_input("second");
        let outcome = block_on(h.orchestrator.send_turn());
        assert_eq!(outcome, TurnOutcome::Stopped);
        assert!(!h.orchestrator.is_loading());

        pool.run_until_stalled();
        let messages = h.orchestrator.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content.as_text(), "partial");
        assert_eq!(h.orchestrator.input(), "second");
    }

    #[test]
    fn test_transport_error_after_cancel_is_quiet() {
        let (llm, tx) = ChannelLlm::new();
        let h = harness(llm);
        h.orchestrator.set_input("q");

        let mut pool = LocalPool::new();
        let outcome = Rc::new(RefCell::new(None));
        {
            let orchestrator = h.orchestrator.clone();
            let outcome = outcome.clone();
            pool.spawner()
                .spawn_local(async move {
                    *outcome.borrow_mut() = Some(orchestrator.send_turn().await);
                })
                .unwrap();
        }
        pool.run_until_stalled();

        h.orchestrator.stop_turn();
        let _ = tx.unbounded_send(Err(ChatError::network("aborted")));
        pool.run_until_stalled();

        assert_eq!(*outcome.borrow(), Some(TurnOutcome::Cancelled));
        assert!(!h.orchestrator.messages()[1].is_error);
    }

    #[test]
    fn test_delete_session_during_turn() {
        let (llm, tx) = ChannelLlm::new();
        let h = harness(llm);
        h.orchestrator.set_input("q");

        let mut pool = LocalPool::new();
        {
            let orchestrator = h.orchestrator.clone();
            pool.spawner()
                .spawn_local(async move {
                    orchestrator.send_turn().await;
                })
                .unwrap();
        }
        pool.run_until_stalled();

        let session_id = h.orchestrator.store().borrow().current_id().unwrap().to_string();
        assert!(block_on(h.orchestrator.delete_session(&session_id)));

        tx.unbounded_send(Ok(text_delta("orphan").into_bytes())).unwrap();
        drop(tx);
        pool.run_until_stalled();

        assert!(!h.orchestrator.is_loading());
        assert!(h.orchestrator.messages().is_empty());
    }

    #[test]
    fn test_session_switching() {
        let h = harness(ScriptedLlm::replying(&text_delta("r")));
        h.orchestrator.set_input("in first");
        block_on(h.orchestrator.send_turn());
        let first = h.orchestrator.store().borrow().current_id().unwrap().to_string();

        let second = block_on(h.orchestrator.new_session());
        assert!(h.orchestrator.messages().is_empty());

        assert!(h.orchestrator.select_session(&first));
        assert_eq!(h.orchestrator.messages().len(), 2);
        assert_ne!(first, second);
    }
}
