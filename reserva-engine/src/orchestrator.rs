use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::availability::AvailabilityService;
use crate::pricing::PricingEngine;
use crate::resiliency::{CircuitBreaker, RetryPolicy};
use crate::saga::{Saga, SagaError, SagaStep};
use reserva_core::notify::{AnalyticsRecorder, NotificationDispatcher};
use reserva_core::payment::{GatewayReceipt, GatewayStatus, PaymentGateway};
use reserva_core::repository::{BookingRepository, ResourceCatalog};
use reserva_core::sync::{resource_lock_key, AvailabilityCache, DistributedLock, LockToken};
use reserva_core::{EngineError, EngineResult};
use reserva_domain::availability::{AvailabilityResult, UnavailableReason};
use reserva_domain::booking::{Booking, BookingResult, BookingStatus, CreateBookingRequest};
use reserva_domain::events::BookingEvent;
use reserva_domain::payment::{Payment, PaymentMethod, PaymentStatus};
use reserva_domain::resource::Resource;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub resource_lock_ttl: StdDuration,
    pub lock_acquire_attempts: u32,
    pub lock_retry_delay: StdDuration,
    pub cancellation_notice_hours: i64,
    pub version_retry_limit: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            resource_lock_ttl: StdDuration::from_secs(10),
            lock_acquire_attempts: 40,
            lock_retry_delay: StdDuration::from_millis(25),
            cancellation_notice_hours: 24,
            version_retry_limit: 3,
        }
    }
}

/// Everything the orchestrator talks to.
pub struct BookingServices {
    pub bookings: Arc<dyn BookingRepository>,
    pub catalog: Arc<dyn ResourceCatalog>,
    pub locks: Arc<dyn DistributedLock>,
    pub cache: Arc<dyn AvailabilityCache>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub notifier: Arc<dyn NotificationDispatcher>,
    pub analytics: Arc<dyn AnalyticsRecorder>,
}

/// Owns the booking lifecycle: reserve, charge, finalize, cancel. The
/// create path runs as a saga so a terminal payment failure rolls the
/// reservation back through the same code that made it.
pub struct BookingOrchestrator {
    config: OrchestratorConfig,
    services: BookingServices,
    availability: Arc<AvailabilityService>,
    pricing: Arc<PricingEngine>,
    payment_policy: RetryPolicy,
    payment_circuit: Arc<CircuitBreaker>,
}

enum SettlementOutcome {
    /// The gateway settled synchronously.
    Settled,
    /// The gateway accepted the charge and will settle later.
    AsyncSettlement,
    /// The gateway was unreachable; settlement is deferred to an
    /// out-of-band retry and the booking stays Pending.
    Deferred,
}

struct BookingSagaCtx {
    request: CreateBookingRequest,
    resource: Resource,
    booking: Option<Booking>,
    payment: Option<Payment>,
    outcome: Option<SettlementOutcome>,
    rejection: Option<AvailabilityResult>,
}

impl BookingOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        services: BookingServices,
        availability: Arc<AvailabilityService>,
        pricing: Arc<PricingEngine>,
        payment_policy: RetryPolicy,
        payment_circuit: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            config,
            services,
            availability,
            pricing,
            payment_policy,
            payment_circuit,
        }
    }

    pub async fn create_booking(&self, request: CreateBookingRequest) -> EngineResult<BookingResult> {
        if request.end_at <= request.start_at {
            return Err(EngineError::Validation(
                "booking window must end after it starts".to_string(),
            ));
        }

        let resource = self
            .services
            .catalog
            .resource(request.resource_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("resource {}", request.resource_id)))?;

        info!(
            resource_id = %resource.id,
            user_id = %request.user_id,
            start_at = %request.start_at,
            "booking requested"
        );

        let saga = Saga::new()
            .then(ReserveStep {
                availability: self.availability.clone(),
                pricing: self.pricing.clone(),
                bookings: self.services.bookings.clone(),
                locks: self.services.locks.clone(),
                config: self.config.clone(),
            })
            .then(ChargeStep {
                bookings: self.services.bookings.clone(),
                gateway: self.services.gateway.clone(),
                policy: self.payment_policy.clone(),
                circuit: self.payment_circuit.clone(),
            })
            .then(FinalizeStep {
                bookings: self.services.bookings.clone(),
                cache: self.services.cache.clone(),
                notifier: self.services.notifier.clone(),
                analytics: self.services.analytics.clone(),
                version_retry_limit: self.config.version_retry_limit,
            });

        let mut ctx = BookingSagaCtx {
            request,
            resource,
            booking: None,
            payment: None,
            outcome: None,
            rejection: None,
        };

        match saga.run(&mut ctx).await {
            Ok(()) => {
                let booking = ctx.booking.take().ok_or_else(|| {
                    EngineError::Internal("saga completed without a booking".to_string())
                })?;
                let message = match ctx.outcome {
                    Some(SettlementOutcome::AsyncSettlement) => {
                        Some("payment is settling asynchronously".to_string())
                    }
                    Some(SettlementOutcome::Deferred) => Some(
                        "payment provider temporarily unavailable, settlement will be retried"
                            .to_string(),
                    ),
                    _ => None,
                };
                Ok(BookingResult::accepted(booking, message))
            }
            Err(saga_error) => self.booking_failure(ctx, saga_error).await,
        }
    }

    async fn booking_failure(
        &self,
        mut ctx: BookingSagaCtx,
        saga_error: SagaError,
    ) -> EngineResult<BookingResult> {
        if !saga_error.compensation_failures.is_empty() {
            let steps: Vec<&'static str> = saga_error
                .compensation_failures
                .iter()
                .map(|(step, _)| *step)
                .collect();
            return Err(EngineError::Compensation(format!(
                "booking saga failed at `{}` and could not compensate step(s) {:?}",
                saga_error.step, steps
            )));
        }

        if let Some(rejection) = ctx.rejection.take() {
            let alternatives = if rejection.reason == Some(UnavailableReason::Conflicting) {
                match self
                    .availability
                    .suggest_alternatives(&ctx.resource, ctx.request.start_at, ctx.request.end_at)
                    .await
                {
                    Ok(slots) => slots,
                    Err(err) => {
                        warn!(error = %err, "failed to compute alternative slots");
                        Vec::new()
                    }
                }
            } else {
                Vec::new()
            };
            let message = rejection
                .reason
                .map(|reason| reason.to_string())
                .unwrap_or_else(|| "requested window is not available".to_string());
            return Ok(BookingResult::rejected(message, alternatives));
        }

        match saga_error.error {
            EngineError::Payment {
                retryable: false,
                message,
            } => {
                let booking = ctx.booking.take().ok_or_else(|| {
                    EngineError::Internal("payment failed before a booking existed".to_string())
                })?;
                let event = BookingEvent::PaymentFailed {
                    booking_id: booking.id,
                    resource_id: booking.resource_id,
                    user_id: booking.user_id,
                    message: message.clone(),
                    at: Utc::now(),
                };
                self.services.notifier.send(&event).await;
                self.services.analytics.record(&event).await;
                Ok(BookingResult::rejected_with_booking(
                    booking,
                    format!("payment failed: {message}"),
                ))
            }
            other => Err(other),
        }
    }

    /// Cancels a booking on behalf of its owner. Returns `Ok(false)` without
    /// mutating anything when the booking is already terminal or starts
    /// within the notice window; concurrent writers are arbitrated by the
    /// version counter with a bounded retry budget.
    pub async fn cancel_booking(
        &self,
        booking_id: Uuid,
        reason: &str,
        requester_id: Uuid,
    ) -> EngineResult<bool> {
        let attempts = self.config.version_retry_limit.max(1);
        for _ in 0..attempts {
            let booking = self
                .services
                .bookings
                .booking(booking_id)
                .await?
                .ok_or_else(|| EngineError::NotFound(format!("booking {booking_id}")))?;

            if booking.user_id != requester_id {
                return Err(EngineError::Authorization(
                    "only the booking owner may cancel it".to_string(),
                ));
            }
            if !booking.is_active() {
                return Ok(false);
            }
            let notice = Duration::hours(self.config.cancellation_notice_hours);
            if booking.start_at <= Utc::now() + notice {
                return Ok(false);
            }

            match self
                .services
                .bookings
                .update_booking_status(
                    booking_id,
                    booking.version,
                    BookingStatus::Cancelled,
                    Some(reason.to_string()),
                )
                .await
            {
                Ok(cancelled) => {
                    let refunded = self.refund_if_settled(&cancelled).await?;
                    evict_snapshot(
                        self.services.cache.as_ref(),
                        cancelled.resource_id,
                        cancelled.start_at.date_naive(),
                    )
                    .await;

                    let event = BookingEvent::Cancelled {
                        booking_id: cancelled.id,
                        resource_id: cancelled.resource_id,
                        user_id: cancelled.user_id,
                        reason: reason.to_string(),
                        refunded,
                        at: Utc::now(),
                    };
                    self.services.notifier.send(&event).await;
                    self.services.analytics.record(&event).await;
                    info!(booking_id = %cancelled.id, refunded, "booking cancelled");
                    return Ok(true);
                }
                Err(EngineError::StaleVersion(_)) => {
                    warn!(booking_id = %booking_id, "cancel lost a version race, retrying");
                    continue;
                }
                Err(other) => return Err(other),
            }
        }

        Err(EngineError::Conflict(format!(
            "booking {booking_id} kept changing underneath the cancellation"
        )))
    }

    /// Refunds the payment of a just-cancelled booking when it already
    /// settled. A refund failure is a compensation failure: logged as a
    /// fatal incident and surfaced, never swallowed.
    async fn refund_if_settled(&self, booking: &Booking) -> EngineResult<bool> {
        let Some(mut payment) = self
            .services
            .bookings
            .payment_for_booking(booking.id)
            .await?
        else {
            return Ok(false);
        };
        if payment.status != PaymentStatus::Completed {
            return Ok(false);
        }

        let Some(reference) = payment.external_reference.clone() else {
            error!(
                booking_id = %booking.id,
                "settled payment has no external reference, manual reconciliation required"
            );
            return Err(EngineError::Compensation(format!(
                "refund for booking {} impossible: missing gateway reference",
                booking.id
            )));
        };

        let gateway = self.services.gateway.clone();
        let amount = payment.amount_cents;
        let refund = self
            .payment_policy
            .execute(self.payment_circuit.as_ref(), || {
                let gateway = gateway.clone();
                let reference = reference.clone();
                async move { gateway.refund(&reference, amount).await }
            })
            .await;

        match refund {
            Ok(receipt) if receipt.status == GatewayStatus::Failed => {
                error!(
                    booking_id = %booking.id,
                    "refund declined by gateway, manual reconciliation required"
                );
                Err(EngineError::Compensation(format!(
                    "refund for booking {} was declined",
                    booking.id
                )))
            }
            Ok(_receipt) => {
                payment.status = PaymentStatus::Refunded;
                payment.touch();
                self.services.bookings.update_payment(&payment).await?;
                info!(booking_id = %booking.id, "payment refunded");
                Ok(true)
            }
            Err(err) => {
                error!(
                    booking_id = %booking.id,
                    error = %err,
                    "refund failed, manual reconciliation required"
                );
                Err(EngineError::Compensation(format!(
                    "refund for booking {} failed: {err}",
                    booking.id
                )))
            }
        }
    }
}

struct ReserveStep {
    availability: Arc<AvailabilityService>,
    pricing: Arc<PricingEngine>,
    bookings: Arc<dyn BookingRepository>,
    locks: Arc<dyn DistributedLock>,
    config: OrchestratorConfig,
}

impl ReserveStep {
    async fn acquire_resource_lock(&self, key: &str) -> EngineResult<LockToken> {
        for _ in 0..self.config.lock_acquire_attempts.max(1) {
            if let Some(token) = self
                .locks
                .acquire(key, self.config.resource_lock_ttl)
                .await?
            {
                return Ok(token);
            }
            tokio::time::sleep(self.config.lock_retry_delay).await;
        }
        Err(EngineError::Conflict(
            "resource is busy with another booking attempt, try again".to_string(),
        ))
    }

    async fn reserve_within_lock(&self, ctx: &mut BookingSagaCtx) -> EngineResult<()> {
        let start = ctx.request.start_at;
        let end = ctx.request.end_at;

        let check = self
            .availability
            .confirm_window(&ctx.resource, start, end)
            .await?;
        if !check.available {
            ctx.rejection = Some(check);
            return Err(EngineError::Conflict(
                "requested window is not available".to_string(),
            ));
        }

        let price_cents = self
            .pricing
            .calculate(&ctx.resource, start, end, ctx.request.user_id)
            .await?;
        let booking = Booking::new(ctx.resource.id, ctx.request.user_id, start, end, price_cents)
            .map_err(|err| EngineError::Validation(err.to_string()))?;
        self.bookings.insert_booking(&booking).await?;

        let payment = Payment::new(booking.id, price_cents);
        self.bookings.insert_payment(&payment).await?;

        info!(booking_id = %booking.id, price_cents, "booking reserved");
        ctx.booking = Some(booking);
        ctx.payment = Some(payment);
        Ok(())
    }
}

#[async_trait]
impl SagaStep<BookingSagaCtx> for ReserveStep {
    fn name(&self) -> &'static str {
        "reserve"
    }

    async fn run(&self, ctx: &mut BookingSagaCtx) -> Result<(), EngineError> {
        let key = resource_lock_key(ctx.resource.id);
        let token = self.acquire_resource_lock(&key).await?;

        let reserved = self.reserve_within_lock(ctx).await;

        match self.locks.release(&key, &token).await {
            Ok(true) => {}
            Ok(false) => warn!(%key, "resource lock expired before release"),
            Err(err) => warn!(%key, error = %err, "failed to release resource lock"),
        }
        reserved
    }

    async fn compensate(&self, ctx: &mut BookingSagaCtx) -> Result<(), EngineError> {
        let Some(booking) = ctx.booking.clone() else {
            return Ok(());
        };

        let cancelled = update_status_with_retry(
            self.bookings.as_ref(),
            booking.id,
            BookingStatus::Cancelled,
            Some("payment failed".to_string()),
            self.config.version_retry_limit,
        )
        .await?;
        ctx.booking = Some(cancelled);

        if let Some(payment) = ctx.payment.as_mut() {
            payment.status = PaymentStatus::Failed;
            payment.touch();
            self.bookings.update_payment(payment).await?;
        }
        Ok(())
    }
}

struct ChargeStep {
    bookings: Arc<dyn BookingRepository>,
    gateway: Arc<dyn PaymentGateway>,
    policy: RetryPolicy,
    circuit: Arc<CircuitBreaker>,
}

#[async_trait]
impl SagaStep<BookingSagaCtx> for ChargeStep {
    fn name(&self) -> &'static str {
        "charge"
    }

    async fn run(&self, ctx: &mut BookingSagaCtx) -> Result<(), EngineError> {
        let booking = ctx
            .booking
            .clone()
            .ok_or_else(|| EngineError::Internal("charge ran before reserve".to_string()))?;
        let mut payment = ctx
            .payment
            .clone()
            .ok_or_else(|| EngineError::Internal("charge ran without a payment row".to_string()))?;

        payment.status = PaymentStatus::Processing;
        payment.touch();
        self.bookings.update_payment(&payment).await?;

        let gateway = self.gateway.clone();
        let method = ctx.request.payment_method.clone();
        let amount = payment.amount_cents;
        let payer = ctx.request.user_id;

        let attempt = self
            .policy
            .execute(self.circuit.as_ref(), || {
                let gateway = gateway.clone();
                let method = method.clone();
                async move { gateway.process(amount, &method, payer).await }
            })
            .await;

        match attempt {
            Ok(receipt) => match receipt.status {
                GatewayStatus::Completed => {
                    payment.status = PaymentStatus::Completed;
                    payment.external_reference = receipt.external_reference;
                    payment.touch();
                    self.bookings.update_payment(&payment).await?;
                    ctx.payment = Some(payment);
                    ctx.outcome = Some(SettlementOutcome::Settled);
                    Ok(())
                }
                GatewayStatus::Processing => {
                    payment.external_reference = receipt.external_reference;
                    payment.touch();
                    self.bookings.update_payment(&payment).await?;
                    ctx.payment = Some(payment);
                    ctx.outcome = Some(SettlementOutcome::AsyncSettlement);
                    Ok(())
                }
                GatewayStatus::Failed => {
                    ctx.payment = Some(payment);
                    Err(EngineError::Payment {
                        message: "payment was declined".to_string(),
                        retryable: false,
                    })
                }
            },
            Err(err) if err.is_retryable() => {
                warn!(
                    booking_id = %booking.id,
                    error = %err,
                    "payment deferred, booking stays pending"
                );
                payment.status = PaymentStatus::Pending;
                payment.touch();
                self.bookings.update_payment(&payment).await?;
                ctx.payment = Some(payment);
                ctx.outcome = Some(SettlementOutcome::Deferred);
                Ok(())
            }
            Err(err) => {
                ctx.payment = Some(payment);
                Err(err)
            }
        }
    }
}

struct FinalizeStep {
    bookings: Arc<dyn BookingRepository>,
    cache: Arc<dyn AvailabilityCache>,
    notifier: Arc<dyn NotificationDispatcher>,
    analytics: Arc<dyn AnalyticsRecorder>,
    version_retry_limit: u32,
}

#[async_trait]
impl SagaStep<BookingSagaCtx> for FinalizeStep {
    fn name(&self) -> &'static str {
        "finalize"
    }

    async fn run(&self, ctx: &mut BookingSagaCtx) -> Result<(), EngineError> {
        let booking = ctx
            .booking
            .clone()
            .ok_or_else(|| EngineError::Internal("finalize ran before reserve".to_string()))?;
        let outcome = ctx
            .outcome
            .as_ref()
            .ok_or_else(|| EngineError::Internal("finalize ran before charge".to_string()))?;

        match outcome {
            SettlementOutcome::Settled => {
                let confirmed = update_status_with_retry(
                    self.bookings.as_ref(),
                    booking.id,
                    BookingStatus::Confirmed,
                    None,
                    self.version_retry_limit,
                )
                .await?;
                evict_snapshot(
                    self.cache.as_ref(),
                    confirmed.resource_id,
                    confirmed.start_at.date_naive(),
                )
                .await;

                let event = BookingEvent::Confirmed {
                    booking_id: confirmed.id,
                    resource_id: confirmed.resource_id,
                    user_id: confirmed.user_id,
                    start_at: confirmed.start_at,
                    end_at: confirmed.end_at,
                    price_cents: confirmed.price_cents,
                    at: Utc::now(),
                };
                self.notifier.send(&event).await;
                self.analytics.record(&event).await;
                info!(booking_id = %confirmed.id, "booking confirmed");
                ctx.booking = Some(confirmed);
            }
            SettlementOutcome::AsyncSettlement | SettlementOutcome::Deferred => {
                let note = match outcome {
                    SettlementOutcome::Deferred => {
                        Some("payment provider unavailable, settlement deferred".to_string())
                    }
                    _ => None,
                };
                let event = BookingEvent::PaymentPending {
                    booking_id: booking.id,
                    resource_id: booking.resource_id,
                    user_id: booking.user_id,
                    note,
                    at: Utc::now(),
                };
                self.notifier.send(&event).await;
                self.analytics.record(&event).await;
                info!(booking_id = %booking.id, "booking pending settlement");
            }
        }
        Ok(())
    }
}

/// Optimistic read-modify-write: re-reads the row and retries the CAS when
/// a concurrent writer bumped the version first.
async fn update_status_with_retry(
    repo: &dyn BookingRepository,
    id: Uuid,
    status: BookingStatus,
    reason: Option<String>,
    attempts: u32,
) -> EngineResult<Booking> {
    for _ in 0..attempts.max(1) {
        let current = repo
            .booking(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("booking {id}")))?;
        match repo
            .update_booking_status(id, current.version, status, reason.clone())
            .await
        {
            Err(EngineError::StaleVersion(_)) => continue,
            other => return other,
        }
    }
    Err(EngineError::Conflict(format!(
        "booking {id} kept changing underneath the writer"
    )))
}

/// Best-effort eviction; short TTLs self-heal when this fails.
async fn evict_snapshot(
    cache: &dyn AvailabilityCache,
    resource_id: Uuid,
    date: chrono::NaiveDate,
) {
    if let Err(err) = cache.evict(resource_id, date).await {
        warn!(%resource_id, %date, error = %err, "failed to evict availability snapshot");
    }
}

/// Scriptable in-process gateway for tests and local wiring.
pub struct MockPaymentGateway {
    mode: Mutex<MockGatewayMode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockGatewayMode {
    Approve,
    Decline,
    SettleLater,
    Unreachable,
}

impl MockPaymentGateway {
    pub fn new(mode: MockGatewayMode) -> Self {
        Self {
            mode: Mutex::new(mode),
        }
    }

    pub fn approving() -> Self {
        Self::new(MockGatewayMode::Approve)
    }

    pub async fn set_mode(&self, mode: MockGatewayMode) {
        *self.mode.lock().await = mode;
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn process(
        &self,
        _amount_cents: i64,
        method: &PaymentMethod,
        _payer_id: Uuid,
    ) -> EngineResult<GatewayReceipt> {
        match *self.mode.lock().await {
            MockGatewayMode::Approve => Ok(GatewayReceipt {
                status: GatewayStatus::Completed,
                external_reference: Some(format!(
                    "mock_{}_{}",
                    method.kind().to_lowercase(),
                    Uuid::new_v4().simple()
                )),
            }),
            MockGatewayMode::Decline => Ok(GatewayReceipt {
                status: GatewayStatus::Failed,
                external_reference: None,
            }),
            MockGatewayMode::SettleLater => Ok(GatewayReceipt {
                status: GatewayStatus::Processing,
                external_reference: Some(format!("mock_async_{}", Uuid::new_v4().simple())),
            }),
            MockGatewayMode::Unreachable => Err(EngineError::Payment {
                message: "mock gateway unreachable".to_string(),
                retryable: true,
            }),
        }
    }

    async fn refund(
        &self,
        external_reference: &str,
        _amount_cents: i64,
    ) -> EngineResult<GatewayReceipt> {
        match *self.mode.lock().await {
            MockGatewayMode::Unreachable => Err(EngineError::Payment {
                message: "mock gateway unreachable".to_string(),
                retryable: true,
            }),
            _ => Ok(GatewayReceipt {
                status: GatewayStatus::Completed,
                external_reference: Some(format!("mock_refund_{external_reference}")),
            }),
        }
    }
}
