//! The HTTP router: drives one request from routing to the final write.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{HeaderMap, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use parking_lot::Mutex;
use portcullis_compiler::{OperationDescriptor, RoutingTable};
use portcullis_validator::{BodySchema, RawValue, RequestLimits, ValidationError};

use crate::codec::{Charset, Codecs};
use crate::config::RouterConfig;
use crate::error::{BuildError, DispatchError, HandlerError};
use crate::error_handler::{DefaultErrorHandler, ErrorHandler};
use crate::fatal::FatalSignal;
use crate::handler::{Handler, Parameters};
use crate::negotiation::{
    negotiate_body, negotiate_charset, negotiate_media_type, parse_content_type, RequestBodySpec,
    ResponseSpec,
};
use crate::request::{BodyReadError, RawBody, RawRequest};
use crate::response::{Payload, Response, SerializedResponse};
use crate::transaction::{
    new_registry, Counters, ResponseSink, TracingObserver, TransactionManager, TransactionObserver,
    TransactionRegistry,
};

/// Where a request flow currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Routing,
    ValidatingParams,
    ValidatingBody,
    Handling,
    NegotiatingResponse,
    Sending,
    Done,
    Error,
}

impl Stage {
    pub fn can_advance_to(self, next: Stage) -> bool {
        use Stage::*;
        matches!(
            (self, next),
            (Routing, ValidatingParams)
                | (ValidatingParams, ValidatingBody)
                | (ValidatingBody, Handling)
                | (Handling, NegotiatingResponse)
                | (NegotiatingResponse, Sending)
                | (
                    Routing | ValidatingParams | ValidatingBody | Handling | NegotiatingResponse,
                    Error
                )
                | (Error, Sending)
                | (Sending, Done)
        )
    }
}

#[derive(Debug)]
struct Progress {
    stage: Stage,
    operation_id: Option<String>,
    response_spec: Option<ResponseSpec>,
    sealed: bool,
}

/// Stage tracker shared between a flow and its build task.
///
/// Once sealed, updates from the build task are ignored.
#[derive(Debug, Clone)]
struct Tracker(Arc<Mutex<Progress>>);

/// What the build task had reached when the flow sealed the tracker.
#[derive(Debug)]
struct Snapshot {
    stage: Stage,
    operation_id: Option<String>,
    response_spec: Option<ResponseSpec>,
}

impl Tracker {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(Progress {
            stage: Stage::Routing,
            operation_id: None,
            response_spec: None,
            sealed: false,
        })))
    }

    fn advance(&self, next: Stage) -> bool {
        let mut progress = self.0.lock();
        if progress.sealed || !progress.stage.can_advance_to(next) {
            return false;
        }
        progress.stage = next;
        true
    }

    fn set_operation(&self, operation_id: &str) {
        let mut progress = self.0.lock();
        if !progress.sealed {
            progress.operation_id = Some(operation_id.to_string());
        }
    }

    fn set_response_spec(&self, spec: ResponseSpec) {
        let mut progress = self.0.lock();
        if !progress.sealed {
            progress.response_spec = Some(spec);
        }
    }

    fn seal(&self) -> Snapshot {
        let mut progress = self.0.lock();
        progress.sealed = true;
        Snapshot {
            stage: progress.stage,
            operation_id: progress.operation_id.clone(),
            response_spec: progress.response_spec.clone(),
        }
    }
}

/// Move the flow's own stage, which only it owns after sealing.
fn transition(current: Stage, next: Stage) -> Stage {
    if !current.can_advance_to(next) {
        tracing::debug!(from = ?current, to = ?next, "unexpected stage transition");
    }
    next
}

struct Inner {
    table: Arc<RoutingTable>,
    config: RouterConfig,
    handlers: HashMap<String, Arc<dyn Handler>>,
    error_handler: Arc<dyn ErrorHandler>,
    codecs: Codecs,
    transactions: TransactionManager,
    fatal: FatalSignal,
}

/// Contract-driven request dispatcher.
#[derive(Clone)]
pub struct HttpRouter {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for HttpRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRouter")
            .field("title", &self.inner.table.title)
            .field("operations", &self.inner.table.operations().len())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// Assembles an [`HttpRouter`].
pub struct HttpRouterBuilder {
    table: Arc<RoutingTable>,
    config: RouterConfig,
    handlers: HashMap<String, Arc<dyn Handler>>,
    default_handler: Option<Arc<dyn Handler>>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    observer: Option<Arc<dyn TransactionObserver>>,
    registry: Option<TransactionRegistry>,
    codecs: Codecs,
    fatal: Option<FatalSignal>,
}

impl HttpRouterBuilder {
    /// Bind a handler to an operation id.
    pub fn handler(mut self, operation_id: impl Into<String>, handler: impl Handler + 'static) -> Self {
        self.handlers.insert(operation_id.into(), Arc::new(handler));
        self
    }

    /// Handler for every operation without its own.
    pub fn default_handler(mut self, handler: impl Handler + 'static) -> Self {
        self.default_handler = Some(Arc::new(handler));
        self
    }

    pub fn error_handler(mut self, error_handler: impl ErrorHandler + 'static) -> Self {
        self.error_handler = Some(Arc::new(error_handler));
        self
    }

    pub fn observer(mut self, observer: Arc<dyn TransactionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Share a live-transaction registry with other routers.
    pub fn registry(mut self, registry: TransactionRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn codecs(mut self, codecs: Codecs) -> Self {
        self.codecs = codecs;
        self
    }

    pub fn fatal_signal(mut self, fatal: FatalSignal) -> Self {
        self.fatal = Some(fatal);
        self
    }

    /// Check handler and parser coverage, then build the router.
    pub fn build(self) -> Result<HttpRouter, BuildError> {
        let mut handlers = HashMap::with_capacity(self.table.operations().len());

        for operation in self.table.operations() {
            let handler = self
                .handlers
                .get(&operation.operation_id)
                .or(self.default_handler.as_ref())
                .cloned()
                .ok_or_else(|| BuildError::HandlerLack {
                    operation_id: operation.operation_id.clone(),
                })?;
            handlers.insert(operation.operation_id.clone(), handler);

            for media_type in &operation.consumable_media_types {
                if media_type.contains('*') || operation.body.is_binary(media_type) {
                    continue;
                }
                if self.codecs.parser(media_type).is_none() {
                    return Err(BuildError::ParserLack {
                        operation_id: operation.operation_id.clone(),
                        media_type: media_type.clone(),
                    });
                }
            }
        }

        let dev_mode = self.config.dev_mode;
        let transactions = TransactionManager::new(
            self.registry.unwrap_or_else(new_registry),
            self.config.timeout,
            self.config.transaction_id_header.clone(),
            self.observer.unwrap_or_else(|| Arc::new(TracingObserver)),
        );

        Ok(HttpRouter {
            inner: Arc::new(Inner {
                table: self.table,
                config: self.config,
                handlers,
                error_handler: self
                    .error_handler
                    .unwrap_or_else(|| Arc::new(DefaultErrorHandler::new(dev_mode))),
                codecs: self.codecs,
                transactions,
                fatal: self.fatal.unwrap_or_default(),
            }),
        })
    }
}

impl HttpRouter {
    pub fn builder(table: Arc<RoutingTable>, config: RouterConfig) -> HttpRouterBuilder {
        HttpRouterBuilder {
            table,
            config,
            handlers: HashMap::new(),
            default_handler: None,
            error_handler: None,
            observer: None,
            registry: None,
            codecs: Codecs::default(),
            fatal: None,
        }
    }

    pub fn table(&self) -> &Arc<RoutingTable> {
        &self.inner.table
    }

    pub fn config(&self) -> &RouterConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &TransactionRegistry {
        self.inner.transactions.registry()
    }

    pub fn fatal_signal(&self) -> &FatalSignal {
        &self.inner.fatal
    }

    /// Serve one request. Every outcome, including failures, ends up in `sink`.
    pub async fn dispatch(&self, request: RawRequest, sink: Box<dyn ResponseSink>) {
        let inner = &self.inner;
        let mut txn = inner.transactions.begin(&request);
        let is_head = request.method == "HEAD";
        let tracker = Tracker::new();

        let build = run_pipeline(
            Arc::clone(inner),
            request,
            txn.counters(),
            tracker.clone(),
        );
        let outcome = inner.transactions.start(&mut txn, build).await;
        let snapshot = tracker.seal();
        let mut stage = snapshot.stage;

        let serialized = outcome.and_then(|response| serialize(&inner.codecs, response));
        let mut serialized = match serialized {
            Ok(serialized) => serialized,
            Err(err) => {
                stage = transition(stage, Stage::Error);
                let err = inner.transactions.catch(&mut txn, err);
                render_error(inner, txn.id(), snapshot.response_spec.as_ref(), &err)
            }
        };

        if is_head {
            serialized.body = Bytes::new();
        }

        stage = transition(stage, Stage::Sending);
        inner
            .transactions
            .end(txn, serialized, snapshot.operation_id.as_deref(), sink);
        let stage = transition(stage, Stage::Done);
        tracing::trace!(stage = ?stage, "flow finished");
    }
}

/// Everything between routing and the checked handler response. Runs as the build task.
async fn run_pipeline(
    inner: Arc<Inner>,
    request: RawRequest,
    counters: Arc<Counters>,
    tracker: Tracker,
) -> Result<Response, DispatchError> {
    let RawRequest {
        method,
        url,
        headers,
        body,
        ..
    } = request;
    check_limits(&inner.config.limits, &url, &headers)?;

    let (path, query) = match url.split_once('?') {
        Some((path, query)) => (path, query),
        None => (url.as_str(), ""),
    };
    let (operation, captures) =
        inner
            .table
            .lookup(&method, path)
            .ok_or_else(|| DispatchError::NotFound {
                method: method.clone(),
                path: path.to_string(),
            })?;
    tracker.set_operation(&operation.operation_id);

    tracker.advance(Stage::ValidatingParams);
    let mut parameters =
        validate_parameters(&operation, &captures, query, &headers).map_err(|err| {
            portcullis_telemetry::log_validation_failure!(
                operation_id = %operation.operation_id,
                code = err.code(),
                error = %err,
                "request parameters rejected"
            );
            err
        })?;

    tracker.advance(Stage::ValidatingBody);
    let content_type = header_str(&headers, CONTENT_TYPE.as_str()).map(str::to_string);

    let media_type = negotiate_media_type(
        header_str(&headers, "accept"),
        &operation.produceable_media_types,
    )?;
    let charset = negotiate_charset(
        header_str(&headers, "accept-charset"),
        &operation.produceable_charsets,
    )?;
    let response_spec = ResponseSpec {
        media_type,
        charset,
    };
    tracker.set_response_spec(response_spec.clone());

    parameters.body =
        read_body(&inner, &operation, body, content_type.as_deref(), &counters).await?;

    tracker.advance(Stage::Handling);
    let response = match inner.handlers.get(&operation.operation_id) {
        Some(handler) => handler.handle(parameters, Arc::clone(&operation)).await?,
        None => return Err(HandlerError::not_implemented(&operation.operation_id).into()),
    };

    tracker.advance(Stage::NegotiatingResponse);
    check_response(&inner.codecs, &operation, &response_spec, response)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// URI length, header and declared content-length limits, checked before routing.
fn check_limits(
    limits: &RequestLimits,
    url: &str,
    headers: &HeaderMap,
) -> Result<(), ValidationError> {
    limits.validate_uri(url)?;

    let header_values: Vec<(&str, Cow<'_, str>)> = headers
        .iter()
        .map(|(name, value)| (name.as_str(), String::from_utf8_lossy(value.as_bytes())))
        .collect();
    limits.validate_headers(header_values.iter().map(|(name, value)| (*name, value.as_ref())))?;

    if let Some(declared) = header_str(headers, CONTENT_LENGTH.as_str())
        .and_then(|len| len.trim().parse::<usize>().ok())
    {
        limits.validate_body_size(declared)?;
    }
    Ok(())
}

fn validate_parameters(
    operation: &OperationDescriptor,
    captures: &[(String, String)],
    query: &str,
    headers: &HeaderMap,
) -> Result<Parameters, ValidationError> {
    let mut parameters = Parameters::default();

    for (name, validator) in &operation.parameters.path {
        let raw = captures
            .iter()
            .find(|(capture, _)| capture == name)
            .map(|(_, value)| RawValue::Single(value.clone()));
        if let Some(value) = validator.validate(raw.as_ref())? {
            parameters.path.insert(name.clone(), value);
        }
    }

    if !operation.parameters.query.is_empty() {
        let raw_query = operation.query_parser.parse(query)?;
        for (name, validator) in &operation.parameters.query {
            if let Some(value) = validator.validate(raw_query.get(name))? {
                parameters.query.insert(name.clone(), value);
            }
        }
    }

    for (name, validator) in &operation.parameters.header {
        let values: Vec<Cow<'_, str>> = headers
            .get_all(name.as_str())
            .iter()
            .map(|value| String::from_utf8_lossy(value.as_bytes()))
            .collect();
        let raw = if values.is_empty() {
            None
        } else {
            Some(RawValue::Single(values.join(",")))
        };
        if let Some(value) = validator.validate(raw.as_ref())? {
            parameters.header.insert(name.clone(), value);
        }
    }

    Ok(parameters)
}

async fn read_body(
    inner: &Inner,
    operation: &OperationDescriptor,
    body: RawBody,
    content_type: Option<&str>,
    counters: &Counters,
) -> Result<Option<Payload>, DispatchError> {
    let bytes = body
        .read_with_limit(inner.config.limits.max_body_size)
        .await
        .map_err(|err| match err {
            BodyReadError::TooLarge { limit } => DispatchError::RequestBodyTooLarge { limit },
            BodyReadError::Read(reason) => DispatchError::BadRequestBodyRead { reason },
        })?;
    counters.add_read(bytes.len());

    let present = !bytes.is_empty();
    operation.body.check_presence(present)?;
    if !present {
        return Ok(None);
    }

    // An absent body is classified above, before its content type is looked at.
    let Some(content_type) = content_type else {
        return Err(DispatchError::UnsupportedMediaType {
            media_type: String::new(),
            supported: operation.consumable_media_types.clone(),
        });
    };
    let spec = negotiate_body(
        Some(content_type),
        &operation.consumable_media_types,
        &operation.consumable_charsets,
    )?;

    if operation.body.is_binary(&spec.media_type) {
        return Ok(Some(Payload::Bytes(bytes)));
    }

    let charset = Charset::parse(&spec.charset).ok_or_else(|| DispatchError::UnsupportedCharset {
        charset: spec.charset.clone(),
        supported: operation.consumable_charsets.clone(),
    })?;
    let text = charset
        .decode(&bytes)
        .map_err(|_| DispatchError::BadBodyEncoding {
            charset: spec.charset.clone(),
        })?;

    let parser = inner
        .codecs
        .parser(&spec.media_type)
        .ok_or_else(|| DispatchError::UnsupportedMediaType {
            media_type: spec.media_type.clone(),
            supported: operation.consumable_media_types.clone(),
        })?;
    let value = parser
        .parse(&text)
        .map_err(|reason| DispatchError::BadBody {
            media_type: spec.media_type.clone(),
            reason,
        })?;

    operation.body.validate(&spec.media_type, &value).map_err(|err| {
        portcullis_telemetry::log_validation_failure!(
            operation_id = %operation.operation_id,
            code = err.code(),
            error = %err,
            "request body rejected"
        );
        err
    })?;

    Ok(Some(Payload::Value(value)))
}

/// Default the content type, then check the handler's response against the contract.
fn check_response(
    codecs: &Codecs,
    operation: &OperationDescriptor,
    spec: &ResponseSpec,
    mut response: Response,
) -> Result<Response, DispatchError> {
    if response.body.is_some() && response.content_type().is_none() {
        let content_type = match (&response.body, spec.media_type.as_deref()) {
            (Some(Payload::Value(_)), media_type) => format!(
                "{}; charset={}",
                media_type.unwrap_or("application/json"),
                spec.charset
            ),
            (_, Some(media_type)) => media_type.to_string(),
            (_, None) => "application/octet-stream".to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&content_type) {
            response.headers.insert(CONTENT_TYPE, value);
        }
    }

    let Some(content_type) = response.content_type().and_then(parse_content_type) else {
        return Ok(response);
    };
    let status = response.status.as_u16();

    if let Some(schema) = operation.responses.schema_for(status, &content_type.media_type) {
        if !matches!(schema, BodySchema::Binary) && codecs.stringifier(&content_type.media_type).is_none()
        {
            return Err(DispatchError::StringifierLack {
                media_type: content_type.media_type,
            });
        }
    }

    let Some(body) = &response.body else {
        return Ok(response);
    };

    let produceable = &operation.produceable_media_types;
    let (main, _) = content_type
        .media_type
        .split_once('/')
        .unwrap_or((content_type.media_type.as_str(), ""));
    let media_ok = produceable
        .iter()
        .any(|p| p == &content_type.media_type || *p == format!("{}/*", main) || p == "*/*");
    if !media_ok {
        return Err(DispatchError::NonProduceableMediaType {
            media_type: content_type.media_type,
            produceable: produceable.clone(),
        });
    }

    if matches!(body, Payload::Value(_)) {
        let canonical = Charset::parse(&content_type.charset);
        let charset_ok = operation.produceable_charsets.iter().any(|c| {
            c.eq_ignore_ascii_case(&content_type.charset)
                || (canonical.is_some() && Charset::parse(c) == canonical)
        });
        if !charset_ok {
            return Err(DispatchError::NonProduceableCharset {
                charset: content_type.charset,
                produceable: operation.produceable_charsets.clone(),
            });
        }
    }

    Ok(response)
}

/// Stringify and encode the body, then compute `content-length`.
fn serialize(codecs: &Codecs, response: Response) -> Result<SerializedResponse, DispatchError> {
    let Response {
        status,
        mut headers,
        body,
    } = response;

    let body = match body {
        None => Bytes::new(),
        Some(Payload::Bytes(bytes)) => bytes,
        Some(Payload::Value(value)) => {
            let content_type = headers
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_content_type)
                .unwrap_or_else(|| RequestBodySpec {
                    media_type: "application/json".to_string(),
                    charset: Charset::Utf8.as_str().to_string(),
                });
            let stringifier = codecs.stringifier(&content_type.media_type).ok_or_else(|| {
                DispatchError::StringifierLack {
                    media_type: content_type.media_type.clone(),
                }
            })?;
            let text = stringifier
                .stringify(&value)
                .map_err(|reason| DispatchError::ResponseSerialization { reason })?;
            let charset = Charset::parse(&content_type.charset).ok_or_else(|| {
                DispatchError::ResponseSerialization {
                    reason: format!("unknown charset '{}'", content_type.charset),
                }
            })?;
            charset
                .encode(&text)
                .map_err(|reason| DispatchError::ResponseSerialization { reason })?
        }
    };

    headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
    Ok(SerializedResponse {
        status,
        headers,
        body,
    })
}

/// Run the error handler with the content type forced to the error content type.
///
/// Error bodies may echo client input the negotiated charset cannot encode,
/// so an encoding failure is retried as UTF-8. Only a failure that survives
/// the retry raises the fatal signal.
fn render_error(
    inner: &Inner,
    transaction_id: &str,
    spec: Option<&ResponseSpec>,
    error: &DispatchError,
) -> SerializedResponse {
    let mut spec = spec.cloned().unwrap_or_default();
    let negotiated = Charset::parse(&spec.charset);
    if negotiated.is_none() {
        spec.charset = Charset::Utf8.as_str().to_string();
    }

    let response = inner.error_handler.handle(transaction_id, &spec, error);
    let serialized = serialize_error(inner, response.clone(), &spec.charset).or_else(|err| {
        if negotiated.is_none() || negotiated == Some(Charset::Utf8) {
            return Err(err);
        }
        tracing::debug!(
            transaction_id = %transaction_id,
            charset = %spec.charset,
            error = %err,
            "error response not encodable in negotiated charset, sending utf-8"
        );
        serialize_error(inner, response, Charset::Utf8.as_str())
    });

    match serialized {
        Ok(serialized) => serialized,
        Err(err) => {
            inner.fatal.raise(format!(
                "failed to serialize error response for {}: {}",
                error.code(),
                err
            ));
            let mut fallback = SerializedResponse::internal_error();
            fallback
                .headers
                .insert(CONTENT_LENGTH, HeaderValue::from(fallback.body.len()));
            fallback
        }
    }
}

fn serialize_error(
    inner: &Inner,
    mut response: Response,
    charset: &str,
) -> Result<SerializedResponse, DispatchError> {
    let content_type = format!("{}; charset={}", inner.config.error_content_type, charset);
    match HeaderValue::from_str(&content_type) {
        Ok(value) => {
            response.headers.insert(CONTENT_TYPE, value);
        }
        Err(_) => {
            response.headers.remove(CONTENT_TYPE);
        }
    }
    serialize(&inner.codecs, response)
}
