use std::sync::Arc;

use futures::stream::BoxStream;
use secrecy::{ExposeSecret, SecretString};
use uuid::Uuid;
use warden_audit::RecordStore;
use warden_core::{
    AuditEntry, BudgetScope, Environment, ErrorCode, FeatureId, GatewayError, ModelId, Outcome,
    PipelineStep, RequestContext, RequestId,
};
use warden_provider::{
    ChatMessage, ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, ProviderError, StreamChunk,
};
use warden_rules::PolicyEngine;

use crate::abuse::AbuseDetector;
use crate::budget::BudgetLedger;
use crate::clock::Clock;
use crate::credential::CredentialResolver;
use crate::error::PipelineError;
use crate::feature_registry::FeatureRegistry;
use crate::input_validator::{InputValidator, RawMessage};
use crate::router::{Endpoint, ProviderRouter};
use crate::security::SecurityPluginHost;

/// Estimated words-per-token ratio used for the deterministic token
/// estimate ahead of budget reservation (§4.11 step 9), avoiding any
/// dependency on a real tokenizer before the provider call returns actual
/// counts.
const WORDS_TO_TOKENS: f64 = 1.3;

/// Everything the orchestrator needs, wired once at startup and shared
/// across every request.
pub struct PipelineDeps {
    pub clock: Arc<dyn Clock>,
    pub records: Arc<dyn RecordStore>,
    pub credentials: Arc<CredentialResolver>,
    pub input_validator: Arc<InputValidator>,
    pub abuse: Arc<AbuseDetector>,
    pub features: Arc<FeatureRegistry>,
    pub policy: Arc<PolicyEngine>,
    pub budget: Arc<BudgetLedger>,
    pub security: Arc<SecurityPluginHost>,
    pub router: Arc<ProviderRouter>,
}

/// One inbound chat-completions call, already parsed off the wire.
pub struct ChatCompletionRequest {
    pub presented_key: String,
    pub declared_environment: Environment,
    pub overridden_upstream_key: Option<SecretString>,
    pub feature_id: FeatureId,
    pub model: String,
    pub messages: Vec<RawMessage>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub dry_run: bool,
    pub org_id: Option<String>,
    pub user_id: Option<String>,
}

pub struct ChatCompletionOutcome {
    pub response: ChatResponse,
    pub warnings: Vec<String>,
    pub request_id: RequestId,
}

/// One inbound embeddings call (§4.8). Treated identically to a chat
/// completion for credential/abuse/feature/policy/budget purposes, except
/// the token estimate counts input words only (no output tokens) and
/// there is no streaming variant.
pub struct EmbeddingCallRequest {
    pub presented_key: String,
    pub declared_environment: Environment,
    pub overridden_upstream_key: Option<SecretString>,
    pub feature_id: FeatureId,
    pub model: String,
    pub input: Vec<String>,
    pub dry_run: bool,
    pub org_id: Option<String>,
    pub user_id: Option<String>,
}

pub struct EmbeddingCallOutcome {
    pub response: EmbeddingResponse,
    pub warnings: Vec<String>,
    pub request_id: RequestId,
}

/// A chat-completions request admitted for streaming dispatch. `chunks`
/// yields OpenAI-shaped chunks as they arrive; budget commit and trace
/// finalization happen on a detached task once the upstream stream ends, so
/// the caller only needs to forward `chunks` to the client (§4.11 step 13
/// "Provider Router.chat (or .chat_stream)").
pub struct ChatStreamOutcome {
    pub request_id: RequestId,
    pub warnings: Vec<String>,
    pub chunks: BoxStream<'static, Result<StreamChunk, ProviderError>>,
}

/// Resolves a model's endpoint route table. Endpoints are returned behind an
/// `Arc` and expected to be the *same* instances across calls for the same
/// model, so that each [`Endpoint`]'s circuit-breaker state (held in its
/// `Mutex<EndpointHealth>`) accumulates across requests instead of resetting
/// every call. Tests and simple deployments use a single-endpoint table (one
/// adapter per model, per `AdapterRegistry`); a production deployment would
/// consult a per-model routing config here.
pub trait RouteTable: Send + Sync {
    fn endpoints_for(&self, model_id: &str) -> Result<Arc<Vec<Endpoint>>, warden_provider::ProviderError>;
}

/// Implements §4.11: runs the fixed 17-step admission-and-dispatch sequence
/// for one chat-completions request.
pub struct RequestPipeline {
    deps: PipelineDeps,
    routes: Arc<dyn RouteTable>,
}

impl RequestPipeline {
    #[must_use]
    pub fn new(deps: PipelineDeps, routes: Arc<dyn RouteTable>) -> Self {
        Self { deps, routes }
    }

    /// # Errors
    /// A [`GatewayError`] with the stable code matching whichever pipeline
    /// step denied or failed the request.
    pub async fn execute(&self, request: ChatCompletionRequest) -> Result<ChatCompletionOutcome, GatewayError> {
        let request_id = RequestId::from(Uuid::new_v4().to_string());
        self.run(request_id.clone(), request)
            .await
            .map_err(PipelineError::into_gateway_error)
    }

    async fn run(
        &self,
        request_id: RequestId,
        request: ChatCompletionRequest,
    ) -> Result<ChatCompletionOutcome, PipelineError> {
        let now = self.deps.clock.now();

        // 2. Credential Resolver.
        let mut identity = self
            .deps
            .credentials
            .resolve(&request.presented_key, request.declared_environment, now)
            .await
            .map_err(|err| {
                PipelineError::Denied(match err.code {
                    ErrorCode::AuthMissingKey | ErrorCode::AuthInvalidKey | ErrorCode::AuthEnvMismatch => err,
                    other => GatewayError::new(other, err.message),
                })
            })?;
        if let Some(overridden) = request.overridden_upstream_key {
            identity = CredentialResolver::with_overridden_upstream_key(identity, overridden);
        }

        let mut recorder = crate::trace_recorder::TraceRecorder::start(
            self.deps.clock.clone(),
            self.deps.records.clone(),
            request_id.clone(),
            identity.app_id.clone(),
            request.feature_id.clone(),
        );
        recorder.set_org_and_user(request.org_id.clone(), request.user_id.clone());
        recorder.set_dry_run(request.dry_run);

        // 3. Environment bind check (redundant with the resolver's own
        // check, but kept explicit per the fixed step order).
        if identity.environment != request.declared_environment {
            recorder
                .fail(
                    Outcome::Error,
                    vec!["environment_mismatch".into()],
                    Some("declared environment does not match key binding".into()),
                )
                .await;
            return Err(GatewayError::new(ErrorCode::AuthEnvMismatch, "environment mismatch").into());
        }

        // 4. Input Validator.
        recorder.start_span(PipelineStep::InputValidation);
        let validated = match self.deps.input_validator.validate(&request.messages) {
            Ok(outcome) => outcome,
            Err(err) => {
                recorder.end_span_error(PipelineStep::InputValidation, &err.message);
                recorder
                    .fail(Outcome::DeniedContent, vec![err.message.clone()], Some(err.message.clone()))
                    .await;
                return Err(err.into());
            }
        };
        recorder.end_span_ok(PipelineStep::InputValidation);
        let mut warnings = validated.warnings;

        // 5. Abuse Detector.
        recorder.start_span(PipelineStep::AbuseDetection);
        let message_contents: Vec<String> = validated.messages.iter().map(|m| m.content.clone()).collect();
        let canonical_json = serde_json::to_string(&message_contents).unwrap_or_default();
        let input_hash = warden_core::hash_messages(&canonical_json);
        let signature = warden_core::request_signature(
            &identity.app_id,
            &request.feature_id,
            &ModelId::from(request.model.clone()),
            &input_hash,
        );
        let abuse_result = self
            .deps
            .abuse
            .check_request(&identity.app_id, &signature, &message_contents)
            .await?;
        if abuse_result.blocked {
            let reason = abuse_result.reason.clone().unwrap_or_default();
            recorder.end_span_error(PipelineStep::AbuseDetection, &reason);
            recorder
                .fail(Outcome::DeniedAbuse, vec![reason.clone()], Some(reason))
                .await;
            return Err(GatewayError::new(ErrorCode::AbuseBlocked, "request blocked by abuse detector").into());
        }
        if let Some(reason) = abuse_result.reason.filter(|_| abuse_result.abuse_type.is_some()) {
            warnings.push(reason);
        }
        recorder.end_span_ok(PipelineStep::AbuseDetection);

        // 6. Model resolution.
        recorder.start_span(PipelineStep::ModelResolution);
        let model_id = ModelId::from(request.model.clone());
        let model = self
            .deps
            .records
            .get_model(&model_id)
            .await?
            .filter(warden_core::ModelDescriptor::is_usable);
        let Some(model) = model else {
            let message = format!("model_not_found: '{}' is unknown or unavailable", request.model);
            recorder.end_span_error(PipelineStep::ModelResolution, &message);
            recorder.fail(Outcome::Error, vec![message.clone()], Some(message.clone())).await;
            return Err(GatewayError::new(ErrorCode::ModelNotFound, message).into());
        };
        recorder.set_model(model.model_id.clone());
        recorder.end_span_ok(PipelineStep::ModelResolution);

        // 7. Feature Registry.
        recorder.start_span(PipelineStep::FeatureCheck);
        let estimated_tokens = estimate_tokens(&message_contents);
        if let Err(err) = self
            .deps
            .features
            .check(
                &identity.app_id,
                &request.feature_id,
                "chat.completions",
                model.model_id.as_str(),
                identity.environment,
                estimated_tokens,
            )
            .await
        {
            recorder.end_span_error(PipelineStep::FeatureCheck, &err.message);
            recorder.fail(Outcome::DeniedFeature, vec![err.message.clone()], Some(err.message.clone())).await;
            return Err(err.into());
        }
        recorder.end_span_ok(PipelineStep::FeatureCheck);

        // 8. Policy Engine.
        recorder.start_span(PipelineStep::PolicyEvaluation);
        let mut ctx = RequestContext::new(request_id.clone(), &to_core_identity(&identity), request.feature_id.clone(), now);
        ctx.model_id = Some(model.model_id.clone());
        ctx.user_id = request.user_id.clone();
        ctx.org_id = request.org_id.clone();
        ctx.estimated_tokens = estimated_tokens;
        ctx.dry_run = request.dry_run;
        let policy_decision = self.deps.policy.evaluate(&ctx).await?;
        match policy_decision.verdict_or_allow() {
            warden_core::RuleAction::Deny => {
                let reason = policy_decision.reasons.join("; ");
                recorder.end_span_error(PipelineStep::PolicyEvaluation, &reason);
                recorder
                    .fail(Outcome::DeniedPolicy, policy_decision.reasons.clone(), Some(reason.clone()))
                    .await;
                return Err(GatewayError::new(ErrorCode::PolicyModelBlocked, reason)
                    .with_reasons(policy_decision.matched_rules)
                    .into());
            }
            warden_core::RuleAction::Warn => {
                warnings.extend(policy_decision.reasons.clone());
                recorder.end_span_ok(PipelineStep::PolicyEvaluation);
            }
            warden_core::RuleAction::Allow => {
                recorder.end_span_ok(PipelineStep::PolicyEvaluation);
            }
        }

        // 9. Token estimate already computed above for the feature check.
        let estimated_cost_usd = model.pricing.cost_usd(u64::from(estimated_tokens), 0);
        recorder.set_estimated_cost(estimated_cost_usd);

        // 10. Budget Ledger.reserve.
        recorder.start_span(PipelineStep::BudgetReserve);
        let scopes = vec![
            BudgetScope::Application {
                app_id: identity.app_id.clone(),
            },
            BudgetScope::Feature {
                app_id: identity.app_id.clone(),
                feature_id: request.feature_id.clone(),
            },
        ];
        let reservation = match self
            .deps
            .budget
            .reserve(&scopes, Some(identity.environment), estimated_cost_usd, now)
            .await
        {
            Ok(handle) => handle,
            Err(err) => {
                recorder.end_span_error(PipelineStep::BudgetReserve, &err.message);
                recorder.fail(Outcome::DeniedBudget, vec![err.message.clone()], Some(err.message.clone())).await;
                return Err(err.into());
            }
        };
        warnings.extend(reservation.warnings.clone());
        recorder.end_span_ok(PipelineStep::BudgetReserve);

        // 11. Security Plugin Host.
        recorder.start_span(PipelineStep::SecurityScan);
        let security_result = self.deps.security.check(&validated.messages).await;
        if !security_result.safe {
            self.deps.budget.release(&reservation, now).await;
            let reason = "content flagged by security plugin host".to_owned();
            recorder.end_span_error(PipelineStep::SecurityScan, &reason);
            recorder.fail(Outcome::DeniedContent, vec![reason.clone()], Some(reason)).await;
            return Err(GatewayError::new(ErrorCode::ContentBlocked, "request blocked by content security scan").into());
        }
        recorder.end_span_ok(PipelineStep::SecurityScan);

        // 12. Dry-run short-circuit.
        if request.dry_run {
            self.deps.budget.release(&reservation, now).await;
            let response = ChatResponse {
                id: format!("dryrun-{request_id}"),
                model: model.model_id.to_string(),
                content: String::new(),
                input_tokens: 0,
                output_tokens: 0,
                finish_reason: "dry_run".into(),
            };
            recorder.complete(Outcome::Allowed, None, None).await;
            return Ok(ChatCompletionOutcome {
                response,
                warnings,
                request_id,
            });
        }

        // 13. Provider Router.chat.
        recorder.start_span(PipelineStep::ProviderDispatch);
        let endpoints = self.routes.endpoints_for(model.model_id.as_str())?;
        let chat_request = ChatRequest {
            model: model.provider_model_id.clone(),
            messages: validated
                .messages
                .iter()
                .map(|m| ChatMessage {
                    role: role_label(m.role).to_owned(),
                    content: m.content.clone(),
                })
                .collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream: false,
        };
        let dispatch_result = self
            .deps
            .router
            .dispatch(&endpoints, &chat_request, &identity.upstream_key)
            .await;

        let response = match dispatch_result {
            Ok(response) => response,
            Err(router_err) => {
                let _ = self.deps.abuse.record_error(&identity.app_id).await;
                self.deps.budget.release(&reservation, now).await;
                recorder.end_span_error(PipelineStep::ProviderDispatch, &router_err.to_string());
                recorder
                    .fail(Outcome::Error, vec![router_err.to_string()], Some(router_err.to_string()))
                    .await;
                return Err(GatewayError::new(ErrorCode::UpstreamFailed, router_err.to_string()).into());
            }
        };
        recorder.end_span_ok(PipelineStep::ProviderDispatch);

        // 14. Compute actual cost.
        let actual_cost_usd = model.pricing.cost_usd(response.input_tokens, response.output_tokens);

        // 15. Budget Ledger.commit, Abuse Detector.record_cost.
        recorder.start_span(PipelineStep::BudgetCommit);
        self.deps.budget.commit(&reservation, actual_cost_usd, now).await;
        let _ = self.deps.abuse.record_cost(&identity.app_id, actual_cost_usd).await;
        recorder.end_span_ok(PipelineStep::BudgetCommit);

        // 16. Trace.complete_trace, Usage Record, Audit Entry.
        recorder
            .complete(
                Outcome::Allowed,
                Some(actual_cost_usd),
                Some((response.input_tokens, response.output_tokens)),
            )
            .await;
        let _ = self
            .deps
            .records
            .write_audit_entry(&AuditEntry {
                id: Uuid::new_v4().to_string(),
                request_id: request_id.clone(),
                app_id: identity.app_id.clone(),
                event_type: "request_admitted".into(),
                recorded_at: now,
                detail: serde_json::json!({ "model": model.model_id.to_string(), "cost_usd": actual_cost_usd }),
            })
            .await;

        // 17. Return the provider response.
        Ok(ChatCompletionOutcome {
            response,
            warnings,
            request_id,
        })
    }
}

impl RequestPipeline {
    /// # Errors
    /// A [`GatewayError`] with the stable code matching whichever pipeline
    /// step denied or failed the request.
    pub async fn execute_embeddings(&self, request: EmbeddingCallRequest) -> Result<EmbeddingCallOutcome, GatewayError> {
        let request_id = RequestId::from(Uuid::new_v4().to_string());
        self.run_embeddings(request_id.clone(), request)
            .await
            .map_err(PipelineError::into_gateway_error)
    }

    async fn run_embeddings(
        &self,
        request_id: RequestId,
        request: EmbeddingCallRequest,
    ) -> Result<EmbeddingCallOutcome, PipelineError> {
        let now = self.deps.clock.now();

        let mut identity = self
            .deps
            .credentials
            .resolve(&request.presented_key, request.declared_environment, now)
            .await
            .map_err(|err| {
                PipelineError::Denied(match err.code {
                    ErrorCode::AuthMissingKey | ErrorCode::AuthInvalidKey | ErrorCode::AuthEnvMismatch => err,
                    other => GatewayError::new(other, err.message),
                })
            })?;
        if let Some(overridden) = request.overridden_upstream_key {
            identity = CredentialResolver::with_overridden_upstream_key(identity, overridden);
        }

        let mut recorder = crate::trace_recorder::TraceRecorder::start(
            self.deps.clock.clone(),
            self.deps.records.clone(),
            request_id.clone(),
            identity.app_id.clone(),
            request.feature_id.clone(),
        );
        recorder.set_org_and_user(request.org_id.clone(), request.user_id.clone());
        recorder.set_dry_run(request.dry_run);

        if identity.environment != request.declared_environment {
            recorder
                .fail(
                    Outcome::Error,
                    vec!["environment_mismatch".into()],
                    Some("declared environment does not match key binding".into()),
                )
                .await;
            return Err(GatewayError::new(ErrorCode::AuthEnvMismatch, "environment mismatch").into());
        }

        recorder.start_span(PipelineStep::InputValidation);
        let raw_messages: Vec<RawMessage> = request
            .input
            .iter()
            .map(|text| RawMessage {
                role: "user".to_owned(),
                content: text.clone(),
            })
            .collect();
        let validated = match self.deps.input_validator.validate(&raw_messages) {
            Ok(outcome) => outcome,
            Err(err) => {
                recorder.end_span_error(PipelineStep::InputValidation, &err.message);
                recorder
                    .fail(Outcome::DeniedContent, vec![err.message.clone()], Some(err.message.clone()))
                    .await;
                return Err(err.into());
            }
        };
        recorder.end_span_ok(PipelineStep::InputValidation);
        let mut warnings = validated.warnings;

        recorder.start_span(PipelineStep::AbuseDetection);
        let message_contents: Vec<String> = validated.messages.iter().map(|m| m.content.clone()).collect();
        let canonical_json = serde_json::to_string(&message_contents).unwrap_or_default();
        let input_hash = warden_core::hash_messages(&canonical_json);
        let signature = warden_core::request_signature(
            &identity.app_id,
            &request.feature_id,
            &ModelId::from(request.model.clone()),
            &input_hash,
        );
        let abuse_result = self
            .deps
            .abuse
            .check_request(&identity.app_id, &signature, &message_contents)
            .await?;
        if abuse_result.blocked {
            let reason = abuse_result.reason.clone().unwrap_or_default();
            recorder.end_span_error(PipelineStep::AbuseDetection, &reason);
            recorder
                .fail(Outcome::DeniedAbuse, vec![reason.clone()], Some(reason))
                .await;
            return Err(GatewayError::new(ErrorCode::AbuseBlocked, "request blocked by abuse detector").into());
        }
        if let Some(reason) = abuse_result.reason.filter(|_| abuse_result.abuse_type.is_some()) {
            warnings.push(reason);
        }
        recorder.end_span_ok(PipelineStep::AbuseDetection);

        recorder.start_span(PipelineStep::ModelResolution);
        let model_id = ModelId::from(request.model.clone());
        let model = self
            .deps
            .records
            .get_model(&model_id)
            .await?
            .filter(warden_core::ModelDescriptor::is_usable);
        let Some(model) = model else {
            let message = format!("model_not_found: '{}' is unknown or unavailable", request.model);
            recorder.end_span_error(PipelineStep::ModelResolution, &message);
            recorder.fail(Outcome::Error, vec![message.clone()], Some(message.clone())).await;
            return Err(GatewayError::new(ErrorCode::ModelNotFound, message).into());
        };
        recorder.set_model(model.model_id.clone());
        recorder.end_span_ok(PipelineStep::ModelResolution);

        recorder.start_span(PipelineStep::FeatureCheck);
        let estimated_tokens = estimate_tokens(&message_contents);
        if let Err(err) = self
            .deps
            .features
            .check(
                &identity.app_id,
                &request.feature_id,
                "embeddings",
                model.model_id.as_str(),
                identity.environment,
                estimated_tokens,
            )
            .await
        {
            recorder.end_span_error(PipelineStep::FeatureCheck, &err.message);
            recorder.fail(Outcome::DeniedFeature, vec![err.message.clone()], Some(err.message.clone())).await;
            return Err(err.into());
        }
        recorder.end_span_ok(PipelineStep::FeatureCheck);

        recorder.start_span(PipelineStep::PolicyEvaluation);
        let mut ctx = RequestContext::new(request_id.clone(), &to_core_identity(&identity), request.feature_id.clone(), now);
        ctx.model_id = Some(model.model_id.clone());
        ctx.user_id = request.user_id.clone();
        ctx.org_id = request.org_id.clone();
        ctx.estimated_tokens = estimated_tokens;
        ctx.dry_run = request.dry_run;
        let policy_decision = self.deps.policy.evaluate(&ctx).await?;
        match policy_decision.verdict_or_allow() {
            warden_core::RuleAction::Deny => {
                let reason = policy_decision.reasons.join("; ");
                recorder.end_span_error(PipelineStep::PolicyEvaluation, &reason);
                recorder
                    .fail(Outcome::DeniedPolicy, policy_decision.reasons.clone(), Some(reason.clone()))
                    .await;
                return Err(GatewayError::new(ErrorCode::PolicyModelBlocked, reason)
                    .with_reasons(policy_decision.matched_rules)
                    .into());
            }
            warden_core::RuleAction::Warn => {
                warnings.extend(policy_decision.reasons.clone());
                recorder.end_span_ok(PipelineStep::PolicyEvaluation);
            }
            warden_core::RuleAction::Allow => {
                recorder.end_span_ok(PipelineStep::PolicyEvaluation);
            }
        }

        let estimated_cost_usd = model.pricing.cost_usd(u64::from(estimated_tokens), 0);
        recorder.set_estimated_cost(estimated_cost_usd);

        recorder.start_span(PipelineStep::BudgetReserve);
        let scopes = vec![
            BudgetScope::Application {
                app_id: identity.app_id.clone(),
            },
            BudgetScope::Feature {
                app_id: identity.app_id.clone(),
                feature_id: request.feature_id.clone(),
            },
        ];
        let reservation = match self
            .deps
            .budget
            .reserve(&scopes, Some(identity.environment), estimated_cost_usd, now)
            .await
        {
            Ok(handle) => handle,
            Err(err) => {
                recorder.end_span_error(PipelineStep::BudgetReserve, &err.message);
                recorder.fail(Outcome::DeniedBudget, vec![err.message.clone()], Some(err.message.clone())).await;
                return Err(err.into());
            }
        };
        warnings.extend(reservation.warnings.clone());
        recorder.end_span_ok(PipelineStep::BudgetReserve);

        recorder.start_span(PipelineStep::SecurityScan);
        let security_result = self.deps.security.check(&validated.messages).await;
        if !security_result.safe {
            self.deps.budget.release(&reservation, now).await;
            let reason = "content flagged by security plugin host".to_owned();
            recorder.end_span_error(PipelineStep::SecurityScan, &reason);
            recorder.fail(Outcome::DeniedContent, vec![reason.clone()], Some(reason)).await;
            return Err(GatewayError::new(ErrorCode::ContentBlocked, "request blocked by content security scan").into());
        }
        recorder.end_span_ok(PipelineStep::SecurityScan);

        if request.dry_run {
            self.deps.budget.release(&reservation, now).await;
            let response = EmbeddingResponse {
                data: Vec::new(),
                model: model.model_id.to_string(),
                usage: warden_provider::EmbeddingUsage {
                    prompt_tokens: 0,
                    total_tokens: 0,
                },
            };
            recorder.complete(Outcome::Allowed, None, None).await;
            return Ok(EmbeddingCallOutcome {
                response,
                warnings,
                request_id,
            });
        }

        recorder.start_span(PipelineStep::ProviderDispatch);
        let endpoints = self.routes.endpoints_for(model.model_id.as_str())?;
        let embed_request = EmbeddingRequest {
            model: model.provider_model_id.clone(),
            input: validated.messages.iter().map(|m| m.content.clone()).collect(),
        };
        let dispatch_result = self
            .deps
            .router
            .dispatch_embedding(&endpoints, &embed_request, &identity.upstream_key)
            .await;

        let response = match dispatch_result {
            Ok(response) => response,
            Err(router_err) => {
                let _ = self.deps.abuse.record_error(&identity.app_id).await;
                self.deps.budget.release(&reservation, now).await;
                recorder.end_span_error(PipelineStep::ProviderDispatch, &router_err.to_string());
                recorder
                    .fail(Outcome::Error, vec![router_err.to_string()], Some(router_err.to_string()))
                    .await;
                return Err(GatewayError::new(ErrorCode::UpstreamFailed, router_err.to_string()).into());
            }
        };
        recorder.end_span_ok(PipelineStep::ProviderDispatch);

        let actual_cost_usd = model.pricing.cost_usd(response.usage.total_tokens, 0);

        recorder.start_span(PipelineStep::BudgetCommit);
        self.deps.budget.commit(&reservation, actual_cost_usd, now).await;
        let _ = self.deps.abuse.record_cost(&identity.app_id, actual_cost_usd).await;
        recorder.end_span_ok(PipelineStep::BudgetCommit);

        recorder
            .complete(Outcome::Allowed, Some(actual_cost_usd), Some((response.usage.total_tokens, 0)))
            .await;
        let _ = self
            .deps
            .records
            .write_audit_entry(&AuditEntry {
                id: Uuid::new_v4().to_string(),
                request_id: request_id.clone(),
                app_id: identity.app_id.clone(),
                event_type: "request_admitted".into(),
                recorded_at: now,
                detail: serde_json::json!({ "model": model.model_id.to_string(), "cost_usd": actual_cost_usd }),
            })
            .await;

        Ok(EmbeddingCallOutcome {
            response,
            warnings,
            request_id,
        })
    }

    /// Runs the identical admission sequence as [`Self::execute`] (steps
    /// 1-12), then opens a stream instead of a single response at step 13.
    /// Budget commit and trace finalization are deferred to a detached task
    /// that drains the stream, since actual token usage is only known once
    /// every chunk has arrived.
    ///
    /// # Errors
    /// A [`GatewayError`] with the stable code matching whichever admission
    /// step denied or failed the request. Failures that occur after the
    /// stream has opened are instead surfaced as the final item of
    /// `chunks`.
    pub async fn execute_chat_stream(&self, request: ChatCompletionRequest) -> Result<ChatStreamOutcome, GatewayError> {
        let request_id = RequestId::from(Uuid::new_v4().to_string());
        self.run_stream(request_id, request).await.map_err(PipelineError::into_gateway_error)
    }

    async fn run_stream(&self, request_id: RequestId, request: ChatCompletionRequest) -> Result<ChatStreamOutcome, PipelineError> {
        let now = self.deps.clock.now();

        let mut identity = self
            .deps
            .credentials
            .resolve(&request.presented_key, request.declared_environment, now)
            .await
            .map_err(|err| {
                PipelineError::Denied(match err.code {
                    ErrorCode::AuthMissingKey | ErrorCode::AuthInvalidKey | ErrorCode::AuthEnvMismatch => err,
                    other => GatewayError::new(other, err.message),
                })
            })?;
        if let Some(overridden) = request.overridden_upstream_key {
            identity = CredentialResolver::with_overridden_upstream_key(identity, overridden);
        }

        let mut recorder = crate::trace_recorder::TraceRecorder::start(
            self.deps.clock.clone(),
            self.deps.records.clone(),
            request_id.clone(),
            identity.app_id.clone(),
            request.feature_id.clone(),
        );
        recorder.set_org_and_user(request.org_id.clone(), request.user_id.clone());
        recorder.set_dry_run(request.dry_run);

        if identity.environment != request.declared_environment {
            recorder
                .fail(
                    Outcome::Error,
                    vec!["environment_mismatch".into()],
                    Some("declared environment does not match key binding".into()),
                )
                .await;
            return Err(GatewayError::new(ErrorCode::AuthEnvMismatch, "environment mismatch").into());
        }

        recorder.start_span(PipelineStep::InputValidation);
        let validated = match self.deps.input_validator.validate(&request.messages) {
            Ok(outcome) => outcome,
            Err(err) => {
                recorder.end_span_error(PipelineStep::InputValidation, &err.message);
                recorder
                    .fail(Outcome::DeniedContent, vec![err.message.clone()], Some(err.message.clone()))
                    .await;
                return Err(err.into());
            }
        };
        recorder.end_span_ok(PipelineStep::InputValidation);
        let mut warnings = validated.warnings;

        recorder.start_span(PipelineStep::AbuseDetection);
        let message_contents: Vec<String> = validated.messages.iter().map(|m| m.content.clone()).collect();
        let canonical_json = serde_json::to_string(&message_contents).unwrap_or_default();
        let input_hash = warden_core::hash_messages(&canonical_json);
        let signature = warden_core::request_signature(
            &identity.app_id,
            &request.feature_id,
            &ModelId::from(request.model.clone()),
            &input_hash,
        );
        let abuse_result = self
            .deps
            .abuse
            .check_request(&identity.app_id, &signature, &message_contents)
            .await?;
        if abuse_result.blocked {
            let reason = abuse_result.reason.clone().unwrap_or_default();
            recorder.end_span_error(PipelineStep::AbuseDetection, &reason);
            recorder
                .fail(Outcome::DeniedAbuse, vec![reason.clone()], Some(reason))
                .await;
            return Err(GatewayError::new(ErrorCode::AbuseBlocked, "request blocked by abuse detector").into());
        }
        if let Some(reason) = abuse_result.reason.filter(|_| abuse_result.abuse_type.is_some()) {
            warnings.push(reason);
        }
        recorder.end_span_ok(PipelineStep::AbuseDetection);

        recorder.start_span(PipelineStep::ModelResolution);
        let model_id = ModelId::from(request.model.clone());
        let model = self
            .deps
            .records
            .get_model(&model_id)
            .await?
            .filter(warden_core::ModelDescriptor::is_usable);
        let Some(model) = model else {
            let message = format!("model_not_found: '{}' is unknown or unavailable", request.model);
            recorder.end_span_error(PipelineStep::ModelResolution, &message);
            recorder.fail(Outcome::Error, vec![message.clone()], Some(message.clone())).await;
            return Err(GatewayError::new(ErrorCode::ModelNotFound, message).into());
        };
        recorder.set_model(model.model_id.clone());
        recorder.end_span_ok(PipelineStep::ModelResolution);

        recorder.start_span(PipelineStep::FeatureCheck);
        let estimated_tokens = estimate_tokens(&message_contents);
        if let Err(err) = self
            .deps
            .features
            .check(
                &identity.app_id,
                &request.feature_id,
                "chat.completions",
                model.model_id.as_str(),
                identity.environment,
                estimated_tokens,
            )
            .await
        {
            recorder.end_span_error(PipelineStep::FeatureCheck, &err.message);
            recorder.fail(Outcome::DeniedFeature, vec![err.message.clone()], Some(err.message.clone())).await;
            return Err(err.into());
        }
        recorder.end_span_ok(PipelineStep::FeatureCheck);

        recorder.start_span(PipelineStep::PolicyEvaluation);
        let mut ctx = RequestContext::new(request_id.clone(), &to_core_identity(&identity), request.feature_id.clone(), now);
        ctx.model_id = Some(model.model_id.clone());
        ctx.user_id = request.user_id.clone();
        ctx.org_id = request.org_id.clone();
        ctx.estimated_tokens = estimated_tokens;
        ctx.dry_run = request.dry_run;
        let policy_decision = self.deps.policy.evaluate(&ctx).await?;
        match policy_decision.verdict_or_allow() {
            warden_core::RuleAction::Deny => {
                let reason = policy_decision.reasons.join("; ");
                recorder.end_span_error(PipelineStep::PolicyEvaluation, &reason);
                recorder
                    .fail(Outcome::DeniedPolicy, policy_decision.reasons.clone(), Some(reason.clone()))
                    .await;
                return Err(GatewayError::new(ErrorCode::PolicyModelBlocked, reason)
                    .with_reasons(policy_decision.matched_rules)
                    .into());
            }
            warden_core::RuleAction::Warn => {
                warnings.extend(policy_decision.reasons.clone());
                recorder.end_span_ok(PipelineStep::PolicyEvaluation);
            }
            warden_core::RuleAction::Allow => {
                recorder.end_span_ok(PipelineStep::PolicyEvaluation);
            }
        }

        let estimated_cost_usd = model.pricing.cost_usd(u64::from(estimated_tokens), 0);
        recorder.set_estimated_cost(estimated_cost_usd);

        recorder.start_span(PipelineStep::BudgetReserve);
        let scopes = vec![
            BudgetScope::Application {
                app_id: identity.app_id.clone(),
            },
            BudgetScope::Feature {
                app_id: identity.app_id.clone(),
                feature_id: request.feature_id.clone(),
            },
        ];
        let reservation = match self
            .deps
            .budget
            .reserve(&scopes, Some(identity.environment), estimated_cost_usd, now)
            .await
        {
            Ok(handle) => handle,
            Err(err) => {
                recorder.end_span_error(PipelineStep::BudgetReserve, &err.message);
                recorder.fail(Outcome::DeniedBudget, vec![err.message.clone()], Some(err.message.clone())).await;
                return Err(err.into());
            }
        };
        warnings.extend(reservation.warnings.clone());
        recorder.end_span_ok(PipelineStep::BudgetReserve);

        recorder.start_span(PipelineStep::SecurityScan);
        let security_result = self.deps.security.check(&validated.messages).await;
        if !security_result.safe {
            self.deps.budget.release(&reservation, now).await;
            let reason = "content flagged by security plugin host".to_owned();
            recorder.end_span_error(PipelineStep::SecurityScan, &reason);
            recorder.fail(Outcome::DeniedContent, vec![reason.clone()], Some(reason)).await;
            return Err(GatewayError::new(ErrorCode::ContentBlocked, "request blocked by content security scan").into());
        }
        recorder.end_span_ok(PipelineStep::SecurityScan);

        if request.dry_run {
            self.deps.budget.release(&reservation, now).await;
            recorder.complete(Outcome::Allowed, None, None).await;
            let dryrun_id = format!("dryrun-{request_id}");
            let done = StreamChunk::done(&dryrun_id, model.model_id.as_str(), "dry_run");
            let chunks: BoxStream<'static, Result<StreamChunk, ProviderError>> =
                Box::pin(futures::stream::once(async move { Ok(done) }));
            return Ok(ChatStreamOutcome {
                request_id,
                warnings,
                chunks,
            });
        }

        recorder.start_span(PipelineStep::ProviderDispatch);
        let endpoints = self.routes.endpoints_for(model.model_id.as_str())?;
        let chat_request = ChatRequest {
            model: model.provider_model_id.clone(),
            messages: validated
                .messages
                .iter()
                .map(|m| ChatMessage {
                    role: role_label(m.role).to_owned(),
                    content: m.content.clone(),
                })
                .collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream: true,
        };
        let dispatch_result = self
            .deps
            .router
            .dispatch_stream(&endpoints, &chat_request, &identity.upstream_key)
            .await;

        let upstream_stream = match dispatch_result {
            Ok(stream) => stream,
            Err(router_err) => {
                let _ = self.deps.abuse.record_error(&identity.app_id).await;
                self.deps.budget.release(&reservation, now).await;
                recorder.end_span_error(PipelineStep::ProviderDispatch, &router_err.to_string());
                recorder
                    .fail(Outcome::Error, vec![router_err.to_string()], Some(router_err.to_string()))
                    .await;
                return Err(GatewayError::new(ErrorCode::UpstreamFailed, router_err.to_string()).into());
            }
        };
        recorder.end_span_ok(PipelineStep::ProviderDispatch);

        let finalize_deps = StreamFinalizeDeps {
            budget: self.deps.budget.clone(),
            abuse: self.deps.abuse.clone(),
            records: self.deps.records.clone(),
            clock: self.deps.clock.clone(),
        };
        let chunks = spawn_stream_finalizer(
            upstream_stream,
            finalize_deps,
            recorder,
            reservation,
            request_id.clone(),
            identity.app_id.clone(),
            estimated_tokens,
            model.pricing.clone(),
        );

        Ok(ChatStreamOutcome {
            request_id,
            warnings,
            chunks,
        })
    }
}

/// Collaborators a streaming finalizer needs once the upstream stream has
/// been opened and the caller has started forwarding chunks.
struct StreamFinalizeDeps {
    budget: Arc<BudgetLedger>,
    abuse: Arc<AbuseDetector>,
    records: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
}

/// Wraps `upstream` so every chunk is forwarded to the returned stream while
/// content length accumulates; once the upstream stream ends (or errors), a
/// detached task commits the budget reservation against the accumulated
/// word-count token estimate and finalizes the trace. The forwarding task
/// itself never blocks the caller on the finalize work.
fn spawn_stream_finalizer(
    mut upstream: BoxStream<'static, Result<StreamChunk, ProviderError>>,
    deps: StreamFinalizeDeps,
    mut recorder: crate::trace_recorder::TraceRecorder,
    reservation: crate::budget::ReservationHandle,
    request_id: RequestId,
    app_id: warden_core::AppId,
    input_tokens: u32,
    pricing: warden_core::ModelPricing,
) -> BoxStream<'static, Result<StreamChunk, ProviderError>> {
    use futures::StreamExt;
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<StreamChunk, ProviderError>>(16);

    tokio::spawn(async move {
        let mut output_words: usize = 0;
        let mut errored: Option<String> = None;

        while let Some(item) = upstream.next().await {
            match &item {
                Ok(chunk) => {
                    if let Some(content) = chunk.choices.first().and_then(|c| c.delta.content.as_deref()) {
                        output_words += content.split_whitespace().count();
                    }
                }
                Err(err) => errored = Some(err.to_string()),
            }
            let failed_send = tx.send(item).await.is_err();
            if failed_send {
                // Receiver dropped (client disconnected); stop forwarding but
                // still finalize below so the reservation isn't leaked.
                break;
            }
            if errored.is_some() {
                break;
            }
        }

        let now = deps.clock.now();
        if let Some(reason) = errored {
            let _ = deps.abuse.record_error(&app_id).await;
            deps.budget.release(&reservation, now).await;
            recorder.end_span_error(PipelineStep::ProviderDispatch, &reason);
            recorder.fail(Outcome::Error, vec![reason.clone()], Some(reason)).await;
            return;
        }

        let output_tokens = ((output_words as f64) * WORDS_TO_TOKENS).ceil() as u64;
        let actual_cost_usd = pricing.cost_usd(u64::from(input_tokens), output_tokens);
        deps.budget.commit(&reservation, actual_cost_usd, now).await;
        let _ = deps.abuse.record_cost(&app_id, actual_cost_usd).await;
        recorder
            .complete(Outcome::Allowed, Some(actual_cost_usd), Some((u64::from(input_tokens), output_tokens)))
            .await;
        let _ = deps
            .records
            .write_audit_entry(&AuditEntry {
                id: Uuid::new_v4().to_string(),
                request_id,
                app_id,
                event_type: "request_admitted".into(),
                recorded_at: now,
                detail: serde_json::json!({ "cost_usd": actual_cost_usd, "streamed": true }),
            })
            .await;
    });

    Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx))
}

fn estimate_tokens(message_contents: &[String]) -> u32 {
    let words: f64 = message_contents
        .iter()
        .map(|content| content.split_whitespace().count() as f64)
        .sum();
    (words * WORDS_TO_TOKENS).ceil() as u32
}

fn role_label(role: crate::input_validator::MessageRole) -> &'static str {
    use crate::input_validator::MessageRole;
    match role {
        MessageRole::System => "system",
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::Data => "data",
        MessageRole::Tool => "tool",
    }
}

/// Bridges the gateway's resolved [`crate::credential::Identity`] (carries a
/// log-correlation key prefix) to the core crate's [`warden_core::Identity`]
/// (carries provider/model allow-lists), which is what [`RequestContext`]
/// expects. Allow-lists are not separately modeled on the gateway identity;
/// policy-level model/provider restrictions are expressed as policy rules
/// instead (see DESIGN.md).
fn to_core_identity(identity: &crate::credential::Identity) -> warden_core::Identity {
    warden_core::Identity {
        app_id: identity.app_id.clone(),
        environment: identity.environment,
        upstream_key: SecretString::from(identity.upstream_key.expose_secret().to_owned()),
        allowed_providers: None,
        allowed_models: None,
    }
}
