//! Operation executor.
//!
//! Each operation resolves an engine, assembles the structured call from the
//! prompt and schema registries, consults the result cache, runs the engine,
//! applies the post-policies and writes the cache back. Cache failures are
//! logged and treated as misses; every other error is tagged with the
//! operation and returned.

use std::sync::Arc;
use std::time::{Duration, Instant};

use lessonkit_cache::{HintCacheRow, ParseCacheRow, ResultCache};
use lessonkit_core::contracts::{v1, v2, ConfirmationScores};
use lessonkit_core::{
    ApiVersion, Engine, HintLevel, ImageBlob, ImageHash, LlmError, Operation, Sampling,
    StructuredCall, TerminologyLevel, VISION_ENGINES,
};
use lessonkit_logging::OperationEvent;
use lessonkit_prompts::{PromptRegistry, SchemaRegistry};
use lessonkit_providers::{decode_json, EngineRegistry};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use crate::policy::{
    apply_analogue_defaults, apply_detect_verbatim, apply_hint_defaults, apply_hint_defaults_v2,
    apply_normalize_limits, apply_ocr_clamp, apply_parse_policy, normalize_check_v12,
    validate_parse_items,
};
use crate::session::{ImageKey, ParseConfirmState, SessionStore};

pub const PARSE_CACHE_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);
pub const HINT_CACHE_TTL: Duration = Duration::from_secs(90 * 24 * 60 * 60);
pub const MAX_PREVIOUS_HINTS: usize = 2;

pub const ACCEPT_AUTO_POLICY: &str = "auto_policy";
pub const ACCEPT_USER_CONFIRMED: &str = "user_confirmed";
pub const ACCEPT_USER_CORRECTED: &str = "user_corrected";

/// Request fields that steer the executor and are not sent to the model.
const HINT_PRIVATE_FIELDS: [&str; 3] = ["image_hash", "chat_id", "model"];

/// A parse result together with where it came from.
#[derive(Debug, Clone)]
pub struct ParseOutcome<T> {
    pub result: T,
    pub image_hash: String,
    pub cache_hit: bool,
    pub state: ParseConfirmState,
}

/// Cache key engine column. v2 rows are kept apart from v1 rows.
pub fn cache_engine(engine: &str, version: ApiVersion) -> String {
    match version {
        ApiVersion::V1 => engine.to_string(),
        ApiVersion::V2 => format!("{engine}:v2"),
    }
}

/// Sampling for a hint level. v1 keeps L1 deterministic.
pub fn hint_sampling(version: ApiVersion, level: HintLevel) -> Sampling {
    let (temperature, top_p, frequency_penalty) = match (version, level) {
        (ApiVersion::V1, HintLevel::L1) => return Sampling::deterministic(),
        (_, HintLevel::L1) => (0.30, 0.85, 0.30),
        (_, HintLevel::L2) => (0.35, 0.90, 0.25),
        (_, HintLevel::L3) => (0.45, 0.90, 0.35),
    };
    Sampling {
        temperature,
        top_p: Some(top_p),
        presence_penalty: None,
        frequency_penalty: Some(frequency_penalty),
    }
}

/// User turn: the optional user prompt, then the `{task, input}` blob.
pub fn user_message(user_prompt: Option<&str>, op: Operation, input: &Value) -> String {
    let blob = json!({ "task": op.as_str(), "input": input }).to_string();
    match user_prompt.map(str::trim_end).filter(|p| !p.trim().is_empty()) {
        Some(prompt) => format!("{prompt}\n\n{blob}"),
        None => blob,
    }
}

fn require_vision(engine: &dyn Engine, operation: Operation) -> Result<(), LlmError> {
    if engine.supports_vision() {
        return Ok(());
    }
    Err(LlmError::Unsupported {
        engine: engine.name().to_string(),
        operation,
        supported: VISION_ENGINES.to_string(),
    })
}

fn to_json<T: Serialize>(value: &T) -> Result<String, LlmError> {
    serde_json::to_string(value).map_err(|e| LlmError::Internal(e.to_string()))
}

/// Serialize a request into the model input, dropping executor-only fields.
fn task_input<T: Serialize>(input: &T, private: &[&str]) -> Result<Value, LlmError> {
    let mut value = serde_json::to_value(input).map_err(|e| LlmError::Internal(e.to_string()))?;
    if let Some(map) = value.as_object_mut() {
        for key in private {
            map.remove(*key);
        }
    }
    Ok(value)
}

fn parse_v2_policy(result: &mut v2::ParseResponse) {
    validate_parse_items(result);
    apply_parse_policy(result);
}

/// Bookkeeping for one operation run; turned into an `OperationEvent`.
struct Run {
    operation: Operation,
    version: ApiVersion,
    engine: String,
    model: String,
    cache_hit: bool,
    started: Instant,
}

impl Run {
    fn start(operation: Operation, version: ApiVersion, engine: &str) -> Self {
        Self {
            operation,
            version,
            engine: engine.to_string(),
            model: String::new(),
            cache_hit: false,
            started: Instant::now(),
        }
    }

    fn serve(&mut self, engine: &dyn Engine, model: &str) {
        self.engine = engine.name().to_string();
        self.model = model.to_string();
    }

    fn finish<T>(self, result: Result<T, LlmError>) -> Result<T, LlmError> {
        let event = OperationEvent::new(
            self.operation.as_str(),
            self.version.as_str(),
            &self.engine,
            &self.model,
        )
        .cache_hit(self.cache_hit)
        .latency_ms(self.started.elapsed().as_millis() as u64);

        match result {
            Ok(value) => {
                event.emit();
                Ok(value)
            }
            Err(err) => {
                let err = err.tagged(self.operation);
                event.failed(&err.to_string()).emit();
                Err(err)
            }
        }
    }
}

/// Hint request fields shared by v1 and v2.
struct HintRequest<'a> {
    level: HintLevel,
    terminology: TerminologyLevel,
    previous_hints: usize,
    image_hash: Option<&'a str>,
    chat_id: Option<i64>,
    model: Option<&'a str>,
}

pub struct Pipeline {
    engines: EngineRegistry,
    prompts: PromptRegistry,
    schemas: SchemaRegistry,
    cache: Arc<dyn ResultCache>,
    sessions: SessionStore,
}

impl Pipeline {
    pub fn new(
        engines: EngineRegistry,
        prompts: PromptRegistry,
        schemas: SchemaRegistry,
        cache: Arc<dyn ResultCache>,
    ) -> Self {
        Self {
            engines,
            prompts,
            schemas,
            cache,
            sessions: SessionStore::default(),
        }
    }

    pub fn with_sessions(mut self, sessions: SessionStore) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn engines(&self) -> &EngineRegistry {
        &self.engines
    }

    pub fn prompts(&self) -> &PromptRegistry {
        &self.prompts
    }

    pub fn cache(&self) -> &Arc<dyn ResultCache> {
        &self.cache
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    #[instrument(skip_all, fields(engine = engine_name))]
    pub async fn detect(
        &self,
        engine_name: &str,
        input: &v1::DetectInput,
    ) -> Result<v1::DetectResult, LlmError> {
        let mut run = Run::start(Operation::Detect, ApiVersion::V1, engine_name);
        let result = self.detect_inner(&mut run, engine_name, input).await;
        run.finish(result)
    }

    #[instrument(skip_all, fields(engine = engine_name))]
    pub async fn parse(
        &self,
        engine_name: &str,
        input: &v1::ParseInput,
    ) -> Result<ParseOutcome<v1::ParseResult>, LlmError> {
        let mut run = Run::start(Operation::Parse, ApiVersion::V1, engine_name);
        let result = self
            .parse_inner(&mut run, engine_name, input, apply_parse_policy::<v1::ParseResult>)
            .await;
        run.finish(result)
    }

    #[instrument(skip_all, fields(engine = engine_name))]
    pub async fn parse_v2(
        &self,
        engine_name: &str,
        input: &v2::ParseInput,
    ) -> Result<ParseOutcome<v2::ParseResponse>, LlmError> {
        let mut run = Run::start(Operation::Parse, ApiVersion::V2, engine_name);
        let result = self.parse_inner(&mut run, engine_name, input, parse_v2_policy).await;
        run.finish(result)
    }

    /// Apply the user's answer to a parse that awaited confirmation.
    #[instrument(skip_all, fields(engine = engine_name))]
    pub async fn confirm_parse(
        &self,
        engine_name: &str,
        input: &v1::ConfirmParseInput,
    ) -> Result<ParseOutcome<v1::ParseResult>, LlmError> {
        let mut run = Run::start(Operation::Parse, ApiVersion::V1, engine_name);
        let result = self.confirm_inner(&mut run, engine_name, input).await;
        run.finish(result)
    }

    #[instrument(skip_all, fields(engine = engine_name, level = %input.level))]
    pub async fn hint(
        &self,
        engine_name: &str,
        input: &v1::HintInput,
    ) -> Result<v1::HintResult, LlmError> {
        let mut run = Run::start(Operation::Hint, ApiVersion::V1, engine_name);
        let request = HintRequest {
            level: input.level,
            terminology: input
                .terminology_level
                .unwrap_or_else(|| input.level.default_terminology()),
            previous_hints: input.previous_hints.len(),
            image_hash: input.image_hash.as_deref(),
            chat_id: input.chat_id,
            model: input.model.as_deref(),
        };
        let result = self
            .hint_inner(&mut run, engine_name, input, request, apply_hint_defaults)
            .await;
        run.finish(result)
    }

    #[instrument(skip_all, fields(engine = engine_name, level = %input.level))]
    pub async fn hint_v2(
        &self,
        engine_name: &str,
        input: &v2::HintInput,
    ) -> Result<v2::HintResult, LlmError> {
        let mut run = Run::start(Operation::Hint, ApiVersion::V2, engine_name);
        let request = HintRequest {
            level: input.level,
            terminology: input
                .terminology_level
                .unwrap_or_else(|| input.level.default_terminology()),
            previous_hints: input.previous_hints.len(),
            image_hash: input.image_hash.as_deref(),
            chat_id: input.chat_id,
            model: input.model.as_deref(),
        };
        let result = self
            .hint_inner(&mut run, engine_name, input, request, apply_hint_defaults_v2)
            .await;
        run.finish(result)
    }

    #[instrument(skip_all, fields(engine = engine_name))]
    pub async fn normalize(
        &self,
        engine_name: &str,
        input: &v1::NormalizeInput,
    ) -> Result<v1::NormalizeResult, LlmError> {
        let mut run = Run::start(Operation::Normalize, ApiVersion::V1, engine_name);
        let result = self.normalize_inner(&mut run, engine_name, input).await;
        run.finish(result)
    }

    #[instrument(skip_all, fields(engine = engine_name))]
    pub async fn check(
        &self,
        engine_name: &str,
        input: &v1::CheckInput,
    ) -> Result<v1::CheckResult, LlmError> {
        let mut run = Run::start(Operation::Check, ApiVersion::V1, engine_name);
        let result = self.check_inner(&mut run, engine_name, input).await;
        run.finish(result)
    }

    #[instrument(skip_all, fields(engine = engine_name))]
    pub async fn analogue(
        &self,
        engine_name: &str,
        input: &v1::AnalogueInput,
    ) -> Result<v1::AnalogueResult, LlmError> {
        let mut run = Run::start(Operation::Analogue, ApiVersion::V1, engine_name);
        let result = self.analogue_inner(&mut run, engine_name, input).await;
        run.finish(result)
    }

    #[instrument(skip_all, fields(engine = engine_name))]
    pub async fn ocr(&self, engine_name: &str, input: &v2::OcrInput) -> Result<v2::OcrResult, LlmError> {
        let mut run = Run::start(Operation::Ocr, ApiVersion::V2, engine_name);
        let result = self.ocr_inner(&mut run, engine_name, input).await;
        run.finish(result)
    }

    // -----------------------------------------------------------------------
    // Operation bodies
    // -----------------------------------------------------------------------

    async fn detect_inner(
        &self,
        run: &mut Run,
        engine_name: &str,
        input: &v1::DetectInput,
    ) -> Result<v1::DetectResult, LlmError> {
        let engine = self.engines.resolve(engine_name)?;
        let model = engine.resolve_model(None);
        run.serve(&*engine, &model);
        require_vision(&*engine, Operation::Detect)?;

        let image = ImageBlob::from_base64(&input.image_b64, input.mime.as_deref())?;
        let task = json!({ "mime": image.mime, "grade_hint": input.grade_hint });
        let call = self
            .structured_call(&*engine, Operation::Detect, run.version, &task, vec![image], Sampling::deterministic(), &model)
            .await?;
        let mut result: v1::DetectResult = self.run_engine(&*engine, &call).await?;
        apply_detect_verbatim(&mut result);
        Ok(result)
    }

    async fn parse_inner<T>(
        &self,
        run: &mut Run,
        engine_name: &str,
        input: &v1::ParseInput,
        policy: fn(&mut T),
    ) -> Result<ParseOutcome<T>, LlmError>
    where
        T: DeserializeOwned + Serialize + ConfirmationScores,
    {
        let version = run.version;
        let options = &input.options;
        let engine = self.engines.resolve(engine_name)?;
        let model = engine.resolve_model(options.model.as_deref());
        run.serve(&*engine, &model);
        require_vision(&*engine, Operation::Parse)?;

        let image = ImageBlob::from_base64(&input.image_b64, input.mime.as_deref())?;
        let image_hash = image.hash().as_str().to_string();
        let key = ImageKey {
            image_hash: image_hash.clone(),
            engine: cache_engine(engine.name(), version),
            model: model.clone(),
        };

        if !options.skip_cache {
            if let Some(result) = self.cached_parse::<T>(&key).await {
                run.cache_hit = true;
                let state = match options.chat_id {
                    Some(chat_id) => {
                        let mut session = self.sessions.session_for(chat_id, &key);
                        if !session.parse.is_accepted() {
                            session.parse = ParseConfirmState::Accepted;
                        }
                        let state = session.parse;
                        self.sessions.put(chat_id, session);
                        state
                    }
                    None => ParseConfirmState::Accepted,
                };
                return Ok(ParseOutcome {
                    result,
                    image_hash,
                    cache_hit: true,
                    state,
                });
            }
        }

        let task = json!({
            "mime": image.mime,
            "options": {
                "grade_hint": options.grade_hint,
                "subject_hint": options.subject_hint,
                "selected_task_index": options.selected_task_index,
                "selected_task_brief": options.selected_task_brief,
            },
        });
        let call = self
            .structured_call(&*engine, Operation::Parse, version, &task, vec![image], Sampling::deterministic(), &model)
            .await?;
        let mut result: T = self.run_engine(&*engine, &call).await?;
        policy(&mut result);
        let (confirmation_needed, reason) = result.confirmation();

        let session = options
            .chat_id
            .map(|chat_id| (chat_id, self.sessions.session_for(chat_id, &key)));
        // A re-parse of an accepted image starts a new confirmation round.
        let prior = match &session {
            Some((_, s)) if !s.parse.is_accepted() => s.parse,
            _ => ParseConfirmState::None,
        };
        let state = prior.on_provider_result()?.on_policy(confirmation_needed)?;
        debug!(image_hash = %image_hash, %reason, state = %state, "Parse policy applied");

        let mut row = ParseCacheRow::new(&key.image_hash, &key.engine, &key.model, to_json(&result)?);
        row.chat_id = options.chat_id;
        row.media_group_id = options.media_group_id.clone();
        row.accepted = state.is_accepted();
        row.accept_reason = row.accepted.then(|| ACCEPT_AUTO_POLICY.to_string());
        row.confirmation_needed = confirmation_needed;
        row.confidence = result.confidence();
        self.store_parse(&row).await;

        if let Some((chat_id, mut session)) = session {
            session.parse = state;
            self.sessions.put(chat_id, session);
        }
        Ok(ParseOutcome {
            result,
            image_hash,
            cache_hit: false,
            state,
        })
    }

    async fn confirm_inner(
        &self,
        run: &mut Run,
        engine_name: &str,
        input: &v1::ConfirmParseInput,
    ) -> Result<ParseOutcome<v1::ParseResult>, LlmError> {
        let engine = self.engines.resolve(engine_name)?;
        let model = engine.resolve_model(input.model.as_deref());
        run.serve(&*engine, &model);

        let image_hash = ImageHash::parse(&input.image_hash)?.as_str().to_string();
        let key = ImageKey {
            image_hash: image_hash.clone(),
            engine: cache_engine(engine.name(), ApiVersion::V1),
            model,
        };
        let row = match self
            .cache
            .find_parse(&key.image_hash, &key.engine, &key.model, Duration::ZERO)
            .await
        {
            Ok(Some(row)) => row,
            Ok(None) => {
                return Err(LlmError::InvalidRequest(format!(
                    "no parse stored for image {image_hash}"
                )))
            }
            Err(e) => {
                warn!(error = %e, "Parse cache read failed; treating as miss");
                return Err(LlmError::InvalidRequest(format!(
                    "no parse stored for image {image_hash}"
                )));
            }
        };
        run.cache_hit = true;
        let mut result: v1::ParseResult = serde_json::from_str(&row.parse_json)
            .map_err(|e| LlmError::Internal(format!("stored parse is unreadable: {e}")))?;

        let session = input
            .chat_id
            .map(|chat_id| (chat_id, self.sessions.session_for(chat_id, &key)));
        let current = match &session {
            Some((_, s)) if s.parse != ParseConfirmState::None => s.parse,
            _ if row.accept_reason.as_deref() == Some(ACCEPT_USER_CORRECTED) => {
                ParseConfirmState::CorrectedAccepted
            }
            _ if row.accepted => ParseConfirmState::Accepted,
            _ => ParseConfirmState::AwaitingUserConfirmation,
        };

        let state = match &input.correction {
            None => {
                let state = current.on_user_yes()?;
                match self
                    .cache
                    .mark_parse_accepted(&key.image_hash, &key.engine, &key.model, ACCEPT_USER_CONFIRMED)
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => warn!(image_hash = %image_hash, "Parse row disappeared before confirmation"),
                    Err(e) => warn!(error = %e, "Failed to mark parse accepted"),
                }
                state
            }
            Some(correction) => {
                let state = current.on_user_correction()?;
                correction.apply_to(&mut result);
                apply_parse_policy(&mut result);

                let mut updated =
                    ParseCacheRow::new(&key.image_hash, &key.engine, &key.model, to_json(&result)?);
                updated.chat_id = input.chat_id.or(row.chat_id);
                updated.media_group_id = row.media_group_id.clone();
                updated.accepted = true;
                updated.accept_reason = Some(ACCEPT_USER_CORRECTED.to_string());
                updated.confirmation_needed = result.confirmation_needed;
                updated.confidence = result.confidence;
                self.store_parse(&updated).await;
                state
            }
        };

        if let Some((chat_id, mut session)) = session {
            session.parse = state;
            self.sessions.put(chat_id, session);
        }
        Ok(ParseOutcome {
            result,
            image_hash,
            cache_hit: true,
            state,
        })
    }

    async fn hint_inner<I, T>(
        &self,
        run: &mut Run,
        engine_name: &str,
        input: &I,
        request: HintRequest<'_>,
        policy: fn(&mut T, HintLevel, TerminologyLevel),
    ) -> Result<T, LlmError>
    where
        I: Serialize,
        T: DeserializeOwned + Serialize,
    {
        if request.previous_hints > MAX_PREVIOUS_HINTS {
            return Err(LlmError::InvalidRequest(format!(
                "previous_hints has {} entries; at most {MAX_PREVIOUS_HINTS} are allowed",
                request.previous_hints
            )));
        }
        let version = run.version;
        let level = request.level;
        let engine = self.engines.resolve(engine_name)?;
        let model = engine.resolve_model(request.model);
        run.serve(&*engine, &model);

        let image_hash = request
            .image_hash
            .map(ImageHash::parse)
            .transpose()?
            .map(|h| h.as_str().to_string());
        let engine_key = cache_engine(engine.name(), version);

        let progress = match (request.chat_id, &image_hash) {
            (Some(chat_id), Some(hash)) => {
                let key = ImageKey {
                    image_hash: hash.clone(),
                    engine: engine_key.clone(),
                    model: model.clone(),
                };
                let session = self.sessions.session_for(chat_id, &key);
                let next = session.hints.on_request(level).map_err(|err| {
                    match session.hints.next_level() {
                        Some(allowed) => {
                            LlmError::InvalidRequest(format!("{err}; next allowed level is {allowed}"))
                        }
                        None => err.into(),
                    }
                })?;
                Some((chat_id, session, next))
            }
            _ => None,
        };

        let cached = match &image_hash {
            Some(hash) => self.cached_hint::<T>(hash, &engine_key, &model, level).await,
            None => None,
        };
        let result = match cached {
            Some(mut hint) => {
                run.cache_hit = true;
                policy(&mut hint, level, request.terminology);
                hint
            }
            None => {
                let mut task = task_input(input, &HINT_PRIVATE_FIELDS)?;
                if let Some(map) = task.as_object_mut() {
                    map.insert("terminology_level".into(), json!(request.terminology));
                }
                let call = self
                    .structured_call(&*engine, Operation::Hint, version, &task, Vec::new(), hint_sampling(version, level), &model)
                    .await?;
                let mut hint: T = self.run_engine(&*engine, &call).await?;
                policy(&mut hint, level, request.terminology);

                if let Some(hash) = &image_hash {
                    let row = HintCacheRow::new(hash, &engine_key, &model, level.number(), to_json(&hint)?);
                    if let Err(e) = self.cache.upsert_hint(&row).await {
                        warn!(error = %e, "Failed to cache hint");
                    }
                }
                hint
            }
        };

        if let Some((chat_id, mut session, next)) = progress {
            session.hints = next;
            self.sessions.put(chat_id, session);
        }
        Ok(result)
    }

    async fn normalize_inner(
        &self,
        run: &mut Run,
        engine_name: &str,
        input: &v1::NormalizeInput,
    ) -> Result<v1::NormalizeResult, LlmError> {
        let engine = self.engines.resolve(engine_name)?;
        let model = engine.resolve_model(None);
        run.serve(&*engine, &model);

        let answer = &input.answer;
        let has_text = answer.text.as_deref().is_some_and(|t| !t.trim().is_empty());
        let photo = answer.photo_b64.as_deref().filter(|p| !p.trim().is_empty());
        let images = match photo {
            Some(b64) => {
                require_vision(&*engine, Operation::Normalize)?;
                vec![ImageBlob::from_base64(b64, answer.photo_mime.as_deref())?]
            }
            None if has_text => Vec::new(),
            None => {
                return Err(LlmError::InvalidRequest(
                    "answer needs text or photo_b64".into(),
                ))
            }
        };

        let mut task = task_input(input, &[])?;
        if let Some(answer) = task.get_mut("answer").and_then(Value::as_object_mut) {
            answer.remove("photo_b64");
            if !images.is_empty() {
                answer.insert("photo_attached".into(), Value::Bool(true));
            }
        }
        let call = self
            .structured_call(&*engine, Operation::Normalize, run.version, &task, images, Sampling::deterministic(), &model)
            .await?;
        let mut result: v1::NormalizeResult = self.run_engine(&*engine, &call).await?;
        apply_normalize_limits(&mut result);
        Ok(result)
    }

    async fn check_inner(
        &self,
        run: &mut Run,
        engine_name: &str,
        input: &v1::CheckInput,
    ) -> Result<v1::CheckResult, LlmError> {
        let engine = self.engines.resolve(engine_name)?;
        let model = engine.resolve_model(None);
        run.serve(&*engine, &model);

        let task = task_input(input, &[])?;
        let call = self
            .structured_call(&*engine, Operation::Check, run.version, &task, Vec::new(), Sampling::deterministic(), &model)
            .await?;
        let raw: Value = self.run_engine(&*engine, &call).await?;
        Ok(normalize_check_v12(&raw, input.branch))
    }

    async fn analogue_inner(
        &self,
        run: &mut Run,
        engine_name: &str,
        input: &v1::AnalogueInput,
    ) -> Result<v1::AnalogueResult, LlmError> {
        let engine = self.engines.resolve(engine_name)?;
        let model = engine.resolve_model(None);
        run.serve(&*engine, &model);

        let task = task_input(input, &[])?;
        let call = self
            .structured_call(&*engine, Operation::Analogue, run.version, &task, Vec::new(), Sampling::deterministic(), &model)
            .await?;
        let mut result: v1::AnalogueResult = self.run_engine(&*engine, &call).await?;
        apply_analogue_defaults(&mut result);
        Ok(result)
    }

    async fn ocr_inner(
        &self,
        run: &mut Run,
        engine_name: &str,
        input: &v2::OcrInput,
    ) -> Result<v2::OcrResult, LlmError> {
        let engine = self.engines.resolve(engine_name)?;
        let model = engine.resolve_model(None);
        run.serve(&*engine, &model);
        require_vision(&*engine, Operation::Ocr)?;

        let image = ImageBlob::from_base64(&input.image_b64, input.mime.as_deref())?;
        let task = json!({ "mime": image.mime, "locale": input.locale });
        let call = self
            .structured_call(&*engine, Operation::Ocr, run.version, &task, vec![image], Sampling::deterministic(), &model)
            .await?;
        let mut result: v2::OcrResult = self.run_engine(&*engine, &call).await?;
        apply_ocr_clamp(&mut result);
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn structured_call(
        &self,
        engine: &dyn Engine,
        operation: Operation,
        version: ApiVersion,
        input: &Value,
        images: Vec<ImageBlob>,
        sampling: Sampling,
        model: &str,
    ) -> Result<StructuredCall, LlmError> {
        let system_prompt = self.prompts.system_prompt(operation, engine.name(), version).await?;
        let user_prompt = self.prompts.user_prompt(operation, engine.name(), version).await?;
        let schema = self.schemas.get(operation, version).await?;
        Ok(StructuredCall {
            operation,
            version,
            system_prompt,
            user_message: user_message(user_prompt.as_deref(), operation, input),
            images,
            schema: schema.raw,
            strict_schema: schema.strict,
            sampling,
            model: Some(model.to_string()),
        })
    }

    async fn run_engine<T: DeserializeOwned>(
        &self,
        engine: &dyn Engine,
        call: &StructuredCall,
    ) -> Result<T, LlmError> {
        engine.ensure_supported(call)?;
        let text = engine.complete(call).await?;
        decode_json(engine.name(), &text)
    }

    async fn cached_parse<T: DeserializeOwned>(&self, key: &ImageKey) -> Option<T> {
        let row = match self
            .cache
            .find_parse(&key.image_hash, &key.engine, &key.model, PARSE_CACHE_TTL)
            .await
        {
            Ok(Some(row)) if row.accepted => row,
            Ok(_) => return None,
            Err(e) => {
                warn!(error = %e, "Parse cache read failed; treating as miss");
                return None;
            }
        };
        match serde_json::from_str(&row.parse_json) {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(image_hash = %key.image_hash, error = %e, "Cached parse is unreadable; ignoring");
                None
            }
        }
    }

    async fn cached_hint<T: DeserializeOwned>(
        &self,
        image_hash: &str,
        engine: &str,
        model: &str,
        level: HintLevel,
    ) -> Option<T> {
        let row = match self
            .cache
            .find_hint(image_hash, engine, model, level.number(), HINT_CACHE_TTL)
            .await
        {
            Ok(row) => row?,
            Err(e) => {
                warn!(error = %e, "Hint cache read failed; treating as miss");
                return None;
            }
        };
        match serde_json::from_str(&row.hint_json) {
            Ok(hint) => Some(hint),
            Err(e) => {
                warn!(image_hash, %level, error = %e, "Cached hint is unreadable; ignoring");
                None
            }
        }
    }

    async fn store_parse(&self, row: &ParseCacheRow) {
        if let Err(e) = self.cache.upsert_parse(row).await {
            warn!(image_hash = %row.image_hash, error = %e, "Failed to cache parse");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lessonkit_cache::{CacheStats, SqliteResultCache};
    use lessonkit_core::ConfirmationReason;
    use lessonkit_providers::MockEngine;

    /// base64 of `page-one` and `page-two`.
    const PAGE_ONE: &str = "cGFnZS1vbmU=";
    const PAGE_TWO: &str = "cGFnZS10d28=";

    const AUTO_PARSE: &str = r#"{"raw_text":"2+2=?","question":"2+2=?","subject":"math","task_type":"arithmetic",
        "confidence":0.92,"meaning_change_risk":0.05,"bracketed_spans_count":0,"needs_rescan":false,
        "confirmation_needed":true,"confirmation_reason":"low_confidence"}"#;
    const DOUBTFUL_PARSE: &str = r#"{"raw_text":"[?]+2=?","question":"[?]+2=?","confidence":0.55,
        "meaning_change_risk":0.1,"bracketed_spans_count":2,"needs_rescan":false}"#;
    const HINT: &str = r#"{"hint_title":"Подумай","hint_text":"Сложи по разрядам.","hint_steps":["Сложи единицы"],"no_final_answer":false}"#;

    struct Fixture {
        pipeline: Pipeline,
        cache: Arc<SqliteResultCache>,
        _dir: tempfile::TempDir,
    }

    fn fixture(engines: Vec<Arc<MockEngine>>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(SqliteResultCache::in_memory().unwrap());
        let mut registry = EngineRegistry::new();
        for engine in engines {
            registry.register(engine);
        }
        let pipeline = Pipeline::new(
            registry,
            PromptRegistry::new(dir.path()),
            SchemaRegistry::embedded_only(),
            cache.clone(),
        );
        Fixture {
            pipeline,
            cache,
            _dir: dir,
        }
    }

    fn parse_input(image: &str, chat_id: Option<i64>) -> v1::ParseInput {
        serde_json::from_value(json!({
            "image_b64": image,
            "options": { "grade_hint": 2, "chat_id": chat_id }
        }))
        .unwrap()
    }

    fn hint_input(level: &str, image_hash: Option<&str>, chat_id: Option<i64>) -> Value {
        json!({
            "level": level,
            "raw_text": "25 + 17 = ?",
            "subject": "math",
            "task_type": "arithmetic",
            "image_hash": image_hash,
            "chat_id": chat_id
        })
    }

    #[tokio::test]
    async fn auto_accepted_parse_is_cached_and_short_circuits() {
        let gpt = MockEngine::new("gpt").with_response(AUTO_PARSE).shared();
        let fx = fixture(vec![gpt.clone()]);

        let first = fx.pipeline.parse("gpt", &parse_input(PAGE_ONE, None)).await.unwrap();
        assert!(!first.result.confirmation_needed);
        assert_eq!(first.result.confirmation_reason, ConfirmationReason::None);
        assert_eq!(first.state, ParseConfirmState::Accepted);
        assert!(!first.cache_hit);

        let row = fx
            .cache
            .find_parse(&first.image_hash, "gpt", "mock-model", Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        assert!(row.accepted);
        assert_eq!(row.accept_reason.as_deref(), Some(ACCEPT_AUTO_POLICY));

        let second = fx.pipeline.parse("openai", &parse_input(PAGE_ONE, None)).await.unwrap();
        assert!(second.cache_hit);
        assert_eq!(second.result, first.result);
        assert_eq!(gpt.call_count(), 1);
    }

    #[tokio::test]
    async fn doubtful_parse_waits_for_confirmation_and_is_not_served_from_cache() {
        let gpt = MockEngine::new("gpt").with_response(DOUBTFUL_PARSE).shared();
        let fx = fixture(vec![gpt.clone()]);

        let first = fx.pipeline.parse("gpt", &parse_input(PAGE_ONE, Some(7))).await.unwrap();
        assert!(first.result.confirmation_needed);
        assert_eq!(first.result.confirmation_reason, ConfirmationReason::LowConfidence);
        assert_eq!(first.state, ParseConfirmState::AwaitingUserConfirmation);

        fx.pipeline.parse("gpt", &parse_input(PAGE_ONE, Some(7))).await.unwrap();
        assert_eq!(gpt.call_count(), 2);
    }

    #[tokio::test]
    async fn user_yes_accepts_the_draft() {
        let gpt = MockEngine::new("gpt").with_response(DOUBTFUL_PARSE).shared();
        let fx = fixture(vec![gpt.clone()]);
        let parsed = fx.pipeline.parse("gpt", &parse_input(PAGE_ONE, Some(7))).await.unwrap();

        let confirm: v1::ConfirmParseInput =
            serde_json::from_value(json!({ "image_hash": parsed.image_hash, "chat_id": 7 })).unwrap();
        let confirmed = fx.pipeline.confirm_parse("gpt", &confirm).await.unwrap();
        assert_eq!(confirmed.state, ParseConfirmState::Accepted);

        let row = fx
            .cache
            .find_parse(&parsed.image_hash, "gpt", "mock-model", Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        assert!(row.accepted);
        assert_eq!(row.accept_reason.as_deref(), Some(ACCEPT_USER_CONFIRMED));

        let again = fx.pipeline.parse("gpt", &parse_input(PAGE_ONE, Some(7))).await.unwrap();
        assert!(again.cache_hit);
        assert_eq!(gpt.call_count(), 1);

        let err = fx.pipeline.confirm_parse("gpt", &confirm).await.unwrap_err();
        assert!(matches!(err.root(), LlmError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn correction_rewrites_the_stored_parse() {
        let gpt = MockEngine::new("gpt").with_response(DOUBTFUL_PARSE).shared();
        let fx = fixture(vec![gpt]);
        let parsed = fx.pipeline.parse("gpt", &parse_input(PAGE_ONE, None)).await.unwrap();

        let confirm: v1::ConfirmParseInput = serde_json::from_value(json!({
            "image_hash": parsed.image_hash,
            "correction": { "raw_text": "3 + 2 = ?", "question": "3 + 2 = ?" }
        }))
        .unwrap();
        let corrected = fx.pipeline.confirm_parse("gpt", &confirm).await.unwrap();
        assert_eq!(corrected.state, ParseConfirmState::CorrectedAccepted);
        assert_eq!(corrected.result.question, "3 + 2 = ?");
        assert!(!corrected.result.confirmation_needed);
        assert_eq!(corrected.result.bracketed_spans_count, 0);

        let row = fx
            .cache
            .find_parse(&parsed.image_hash, "gpt", "mock-model", Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.accept_reason.as_deref(), Some(ACCEPT_USER_CORRECTED));
        let stored: v1::ParseResult = serde_json::from_str(&row.parse_json).unwrap();
        assert_eq!(stored.raw_text, "3 + 2 = ?");
    }

    #[tokio::test]
    async fn confirming_an_unknown_image_is_rejected() {
        let fx = fixture(vec![MockEngine::new("gpt").shared()]);
        let confirm: v1::ConfirmParseInput =
            serde_json::from_value(json!({ "image_hash": "ab".repeat(32) })).unwrap();
        let err = fx.pipeline.confirm_parse("gpt", &confirm).await.unwrap_err();
        assert!(matches!(err.root(), LlmError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn v2_parse_uses_its_own_cache_rows_and_checks_items() {
        let v2_reply = r#"{"raw_text":"25·4","question":"25·4","confidence":0.95,"meaning_change_risk":0.0,
            "items":[{"item_id":"1","solution_internal":{"solution_steps":["25 · 4 = 100"],"final_answer":99}}]}"#;
        let gpt = MockEngine::new("gpt").shared();
        gpt.push(Ok(AUTO_PARSE.to_string()));
        gpt.push(Ok(v2_reply.to_string()));
        let fx = fixture(vec![gpt.clone()]);

        let v1_outcome = fx.pipeline.parse("gpt", &parse_input(PAGE_ONE, None)).await.unwrap();
        assert_eq!(v1_outcome.state, ParseConfirmState::Accepted);

        let v2_outcome = fx.pipeline.parse_v2("gpt", &parse_input(PAGE_ONE, None)).await.unwrap();
        assert!(!v2_outcome.cache_hit);
        assert_eq!(gpt.call_count(), 2);
        assert!(v2_outcome.result.items[0].item_quality.unsafe_to_finalize_answer);

        let row = fx
            .cache
            .find_parse(&v2_outcome.image_hash, "gpt:v2", "mock-model", Duration::ZERO)
            .await
            .unwrap();
        assert!(row.is_some());
        assert_eq!(gpt.calls()[1].version, ApiVersion::V2);
    }

    #[tokio::test]
    async fn skip_cache_reads_fresh_but_still_writes() {
        let gpt = MockEngine::new("gpt").with_response(AUTO_PARSE).shared();
        let fx = fixture(vec![gpt.clone()]);
        fx.pipeline.parse("gpt", &parse_input(PAGE_ONE, None)).await.unwrap();

        let mut input = parse_input(PAGE_ONE, None);
        input.options.skip_cache = true;
        let outcome = fx.pipeline.parse("gpt", &input).await.unwrap();
        assert!(!outcome.cache_hit);
        assert_eq!(gpt.call_count(), 2);
        assert_eq!(fx.cache.stats().await.unwrap().parse_rows, 1);
    }

    #[tokio::test]
    async fn model_override_scopes_the_cache() {
        let gpt = MockEngine::new("gpt").with_response(AUTO_PARSE).shared();
        let fx = fixture(vec![gpt.clone()]);
        fx.pipeline.parse("gpt", &parse_input(PAGE_ONE, None)).await.unwrap();

        let mut input = parse_input(PAGE_ONE, None);
        input.options.model = Some(" gpt-5-mini ".into());
        let outcome = fx.pipeline.parse("gpt", &input).await.unwrap();
        assert!(!outcome.cache_hit);
        assert_eq!(gpt.calls()[1].model.as_deref(), Some("gpt-5-mini"));
    }

    #[tokio::test]
    async fn image_payload_stays_out_of_the_user_message() {
        let gpt = MockEngine::new("gpt").with_response(r#"{"final_state":"ok","blocks":[]}"#).shared();
        let fx = fixture(vec![gpt.clone()]);
        let input: v1::DetectInput =
            serde_json::from_value(json!({ "image_b64": PAGE_TWO, "grade_hint": 3 })).unwrap();
        let result = fx.pipeline.detect("gpt", &input).await.unwrap();
        assert!(result.verbatim_consistent);

        let call = &gpt.calls()[0];
        assert_eq!(call.images.len(), 1);
        assert!(!call.user_message.contains(PAGE_TWO));
        assert!(call.user_message.contains(r#""task":"detect""#));
        assert!(call.sampling.is_deterministic());
    }

    #[tokio::test]
    async fn hints_are_cached_per_level_with_level_sampling() {
        let gpt = MockEngine::new("gpt").with_response(HINT).shared();
        let fx = fixture(vec![gpt.clone()]);
        let hash = "cd".repeat(32);

        let l2: v2::HintInput = serde_json::from_value(hint_input("L2", Some(&hash), None)).unwrap();
        let first = fx.pipeline.hint_v2("gpt", &l2).await.unwrap();
        assert!(first.no_final_answer);
        assert_eq!(first.level, Some(HintLevel::L2));
        assert_eq!(first.terminology_level, Some(TerminologyLevel::Light));

        let sampling = gpt.calls()[0].sampling;
        assert_eq!(sampling.temperature, 0.35);
        assert_eq!(sampling.top_p, Some(0.90));
        assert_eq!(sampling.frequency_penalty, Some(0.25));

        let second = fx.pipeline.hint_v2("gpt", &l2).await.unwrap();
        assert_eq!(second, first);
        assert_eq!(gpt.call_count(), 1);

        let l3: v2::HintInput = serde_json::from_value(hint_input("L3", Some(&hash), None)).unwrap();
        fx.pipeline.hint_v2("gpt", &l3).await.unwrap();
        assert_eq!(gpt.call_count(), 2);

        // v1 shares no rows with v2.
        let v1_l2: v1::HintInput = serde_json::from_value(hint_input("L2", Some(&hash), None)).unwrap();
        fx.pipeline.hint("gpt", &v1_l2).await.unwrap();
        assert_eq!(gpt.call_count(), 3);
    }

    #[tokio::test]
    async fn v1_first_hint_is_deterministic() {
        let gpt = MockEngine::new("gpt").with_response(HINT).shared();
        let fx = fixture(vec![gpt.clone()]);
        let input: v1::HintInput = serde_json::from_value(hint_input("L1", None, None)).unwrap();
        let hint = fx.pipeline.hint("gpt", &input).await.unwrap();
        assert_eq!(hint.terminology_level, Some(TerminologyLevel::None));

        let call = &gpt.calls()[0];
        assert!(call.sampling.is_deterministic());
        assert!(!call.user_message.contains("chat_id"));
        assert!(call.user_message.contains(r#""terminology_level":"none""#));
    }

    #[tokio::test]
    async fn too_many_previous_hints_is_rejected_before_any_call() {
        let gpt = MockEngine::new("gpt").with_response(HINT).shared();
        let fx = fixture(vec![gpt.clone()]);
        let mut raw = hint_input("L3", None, None);
        raw["previous_hints"] = json!(["a", "b", "c"]);
        let input: v1::HintInput = serde_json::from_value(raw).unwrap();

        let err = fx.pipeline.hint("gpt", &input).await.unwrap_err();
        assert!(matches!(err.root(), LlmError::InvalidRequest(_)));
        assert!(err.to_string().starts_with("hint:"));
        assert_eq!(gpt.call_count(), 0);
    }

    #[tokio::test]
    async fn hint_progression_is_tracked_per_chat() {
        let gpt = MockEngine::new("gpt").with_response(HINT).shared();
        let fx = fixture(vec![gpt.clone()]);
        let hash = "ef".repeat(32);

        let skip: v2::HintInput = serde_json::from_value(hint_input("L2", Some(&hash), Some(5))).unwrap();
        let err = fx.pipeline.hint_v2("gpt", &skip).await.unwrap_err();
        assert!(matches!(err.root(), LlmError::InvalidRequest(_)));
        assert!(err.to_string().contains("next allowed level is L1"), "{err}");
        assert_eq!(gpt.call_count(), 0);

        let l1: v2::HintInput = serde_json::from_value(hint_input("L1", Some(&hash), Some(5))).unwrap();
        fx.pipeline.hint_v2("gpt", &l1).await.unwrap();
        fx.pipeline.hint_v2("gpt", &skip).await.unwrap();

        let session = fx.pipeline.sessions().get(5).unwrap();
        assert_eq!(session.hints.as_str(), "l2_shown");
    }

    #[tokio::test]
    async fn text_only_engines_refuse_image_operations() {
        let deepseek = MockEngine::new("deepseek").without_vision().with_response(HINT).shared();
        let fx = fixture(vec![deepseek.clone()]);

        let err = fx.pipeline.parse("deepseek", &parse_input(PAGE_ONE, None)).await.unwrap_err();
        assert!(matches!(err.root(), LlmError::Unsupported { .. }));

        let ocr: v2::OcrInput = serde_json::from_value(json!({ "image_b64": PAGE_ONE })).unwrap();
        let err = fx.pipeline.ocr("deepseek", &ocr).await.unwrap_err();
        assert!(matches!(err.root(), LlmError::Unsupported { .. }));

        let normalize: v1::NormalizeInput = serde_json::from_value(json!({
            "answer": { "photo_b64": PAGE_TWO },
            "expected_shape": "number"
        }))
        .unwrap();
        let err = fx.pipeline.normalize("deepseek", &normalize).await.unwrap_err();
        assert!(matches!(err.root(), LlmError::Unsupported { .. }));

        let hint: v1::HintInput = serde_json::from_value(hint_input("L1", None, None)).unwrap();
        assert!(fx.pipeline.hint("deepseek", &hint).await.is_ok());
        assert_eq!(deepseek.call_count(), 1);
    }

    #[tokio::test]
    async fn unknown_engine_lists_the_registered_ones() {
        let fx = fixture(vec![MockEngine::new("gemini").shared(), MockEngine::new("gpt").shared()]);
        let err = fx.pipeline.parse("claude", &parse_input(PAGE_ONE, None)).await.unwrap_err();
        match err.root() {
            LlmError::UnknownProvider { available, .. } => assert_eq!(available, "gemini, gpt"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn normalize_needs_an_answer_and_limits_the_message() {
        let reply = json!({
            "success": false,
            "needs_clarification": true,
            "needs_user_action_message": "я".repeat(300)
        })
        .to_string();
        let gpt = MockEngine::new("gpt").with_response(reply).shared();
        let fx = fixture(vec![gpt.clone()]);

        let empty: v1::NormalizeInput = serde_json::from_value(json!({
            "answer": { "text": "   " },
            "expected_shape": "number"
        }))
        .unwrap();
        let err = fx.pipeline.normalize("gpt", &empty).await.unwrap_err();
        assert!(matches!(err.root(), LlmError::InvalidRequest(_)));

        let photo: v1::NormalizeInput = serde_json::from_value(json!({
            "answer": { "photo_b64": PAGE_TWO },
            "expected_shape": "number"
        }))
        .unwrap();
        let result = fx.pipeline.normalize("gpt", &photo).await.unwrap();
        let message = result.needs_user_action_message.unwrap();
        assert_eq!(message.chars().count(), 120);

        let call = &gpt.calls()[0];
        assert_eq!(call.images.len(), 1);
        assert!(call.user_message.contains("photo_attached"));
        assert!(!call.user_message.contains(PAGE_TWO));
    }

    #[tokio::test]
    async fn check_output_is_projected_onto_v12() {
        let reply = r#"{"verdict":"maybe","confidence":1.7,"issues":[{"reason":"r1"},{"reason":"r2"},{"reason":"r3"},{"reason":"r4"}],"extra":"x"}"#;
        let fx = fixture(vec![MockEngine::new("gemini").with_response(reply).shared()]);
        let input: v1::CheckInput = serde_json::from_value(json!({
            "subject": "math",
            "student_normalized": { "value": 42 },
            "expected_solution": { "steps": ["6 · 7 = 42"] }
        }))
        .unwrap();

        let result = fx.pipeline.check("gemini", &input).await.unwrap();
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["verdict"], "needs_more_info");
        assert_eq!(value["confidence"], 1.0);
        assert_eq!(value["issues"].as_array().unwrap().len(), 3);
        assert_eq!(value["branch"], "generic_branch");
        assert_eq!(value["version"], "1.2");
        assert_eq!(value["safety"], json!({ "pii_removed": false, "banned_content": false }));
        assert!(value.get("extra").is_none());
    }

    #[tokio::test]
    async fn analogue_gets_leak_guard_defaults() {
        let reply = r#"{"analogy":{"task_text":"У Маши 3 груши.","solution_steps":["3 + 1 = 4"],"transfer_bridge":"Так же"}}"#;
        let fx = fixture(vec![MockEngine::new("gpt").with_response(reply).shared()]);
        let input: v1::AnalogueInput = serde_json::from_value(json!({
            "subject": "math",
            "method_tag": "addition",
            "original_task_essence": "сложение в пределах 10"
        }))
        .unwrap();

        let result = fx.pipeline.analogue("gpt", &input).await.unwrap();
        assert!(result.leak_guard_passed);
        assert!(result.safety.no_original_answer_leak);
    }

    #[tokio::test]
    async fn ocr_confidence_is_clamped() {
        let gemini = MockEngine::new("gemini")
            .with_response(r#"{"raw_answer_text":"42","confidence":1.3}"#)
            .shared();
        let fx = fixture(vec![gemini.clone()]);
        let input: v2::OcrInput = serde_json::from_value(json!({ "image_b64": PAGE_ONE })).unwrap();
        let result = fx.pipeline.ocr("google", &input).await.unwrap();
        assert_eq!(result.raw_answer_text, "42");
        assert_eq!(result.confidence, 1.0);
        assert_eq!(gemini.calls()[0].version, ApiVersion::V2);
    }

    #[tokio::test]
    async fn engine_errors_are_tagged_with_the_operation() {
        let gpt = MockEngine::new("gpt").shared();
        gpt.push(Err(LlmError::provider("gpt", Some(500), "boom")));
        let fx = fixture(vec![gpt]);
        let err = fx.pipeline.parse("gpt", &parse_input(PAGE_ONE, None)).await.unwrap_err();
        assert!(matches!(err, LlmError::Operation { operation: Operation::Parse, .. }));
        assert!(matches!(err.root(), LlmError::ProviderError { status: Some(500), .. }));

        let err = fx.pipeline.parse("gpt", &parse_input(PAGE_ONE, None)).await.unwrap_err();
        assert!(matches!(err.root(), LlmError::EmptyOutput { .. }));
    }

    struct BrokenCache;

    #[async_trait]
    impl ResultCache for BrokenCache {
        async fn upsert_parse(&self, _row: &ParseCacheRow) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }
        async fn find_parse(&self, _: &str, _: &str, _: &str, _: Duration) -> anyhow::Result<Option<ParseCacheRow>> {
            anyhow::bail!("database is locked")
        }
        async fn mark_parse_accepted(&self, _: &str, _: &str, _: &str, _: &str) -> anyhow::Result<bool> {
            anyhow::bail!("database is locked")
        }
        async fn upsert_hint(&self, _row: &HintCacheRow) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }
        async fn find_hint(&self, _: &str, _: &str, _: &str, _: u8, _: Duration) -> anyhow::Result<Option<HintCacheRow>> {
            anyhow::bail!("database is locked")
        }
        async fn purge_parse(&self, _: Duration) -> anyhow::Result<usize> {
            Ok(0)
        }
        async fn purge_hints(&self, _: Duration) -> anyhow::Result<usize> {
            Ok(0)
        }
        async fn stats(&self) -> anyhow::Result<CacheStats> {
            Ok(CacheStats::default())
        }
    }

    #[tokio::test]
    async fn cache_failures_degrade_to_misses() {
        let gpt = MockEngine::new("gpt").with_response(AUTO_PARSE).shared();
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(
            EngineRegistry::new().with(gpt.clone()),
            PromptRegistry::new(dir.path()),
            SchemaRegistry::embedded_only(),
            Arc::new(BrokenCache),
        );
        let outcome = pipeline.parse("gpt", &parse_input(PAGE_ONE, None)).await.unwrap();
        assert_eq!(outcome.state, ParseConfirmState::Accepted);

        let hint: v1::HintInput =
            serde_json::from_value(hint_input("L1", Some(&"ab".repeat(32)), None)).unwrap();
        assert!(pipeline.hint("gpt", &hint).await.is_ok());
        assert_eq!(gpt.call_count(), 2);
    }

    #[test]
    fn user_message_puts_the_prompt_first() {
        let input = json!({ "level": "L1" });
        let bare: Value = serde_json::from_str(&user_message(None, Operation::Hint, &input)).unwrap();
        assert_eq!(bare, json!({ "task": "hint", "input": { "level": "L1" } }));
        let with_prompt = user_message(Some("Ответь по-русски.\n"), Operation::Hint, &input);
        assert!(with_prompt.starts_with("Ответь по-русски.\n\n{"));
        assert_eq!(user_message(Some("  "), Operation::Hint, &input), user_message(None, Operation::Hint, &input));
    }

    #[test]
    fn cache_engine_separates_versions() {
        assert_eq!(cache_engine("gpt", ApiVersion::V1), "gpt");
        assert_eq!(cache_engine("gemini", ApiVersion::V2), "gemini:v2");
    }
}
