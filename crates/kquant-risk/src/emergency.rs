//! 비상 정지.
//!
//! 발동 조건: 일일 손실 한도 초과, 연속 손실 N회, 상류 API 장기 단절,
//! 포지션 평가 정보의 장기 미갱신, 비정상적으로 높은 에러율, 수동 발동.
//! 발동 중에는 동기 판정이 모든 신규 주문을 거부합니다 (규칙 10).
//! 해제는 일반 설정과 분리된 리셋 토큰을 요구합니다.

use kquant_bus::{Envelope, EventBus, Payload, Topic};
use kquant_core::{KquantError, KquantResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

/// 비상 정지 상태.
pub struct EmergencyStop {
    bus: Arc<EventBus>,
    armed: AtomicBool,
    reason: Mutex<Option<String>>,
    /// 해제에 필요한 리셋 토큰
    reset_token: String,
}

impl EmergencyStop {
    /// 새 비상 정지 상태를 생성합니다.
    pub fn new(bus: Arc<EventBus>, reset_token: impl Into<String>) -> Self {
        Self {
            bus,
            armed: AtomicBool::new(false),
            reason: Mutex::new(None),
            reset_token: reset_token.into(),
        }
    }

    /// 발동 여부를 확인합니다.
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    /// 발동 사유를 반환합니다.
    pub fn reason(&self) -> Option<String> {
        self.reason.lock().expect("lock poisoned").clone()
    }

    /// 비상 정지를 발동합니다. 이미 발동 중이면 무시됩니다.
    pub fn arm(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if self.armed.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.reason.lock().expect("lock poisoned") = Some(reason.clone());
        error!(reason = %reason, "EMERGENCY STOP armed");

        let _ = self.bus.publish(Envelope::new(
            Topic::EmergencyStop,
            "risk_engine",
            Payload::EmergencyStop {
                armed: true,
                reason,
            },
        ));
    }

    /// 리셋 토큰으로 비상 정지를 해제합니다.
    pub fn disarm(&self, token: &str) -> KquantResult<()> {
        if token != self.reset_token {
            warn!("Emergency stop disarm rejected: invalid token");
            return Err(KquantError::Validation(
                "invalid emergency reset token".to_string(),
            ));
        }
        if !self.armed.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        *self.reason.lock().expect("lock poisoned") = None;
        info!("Emergency stop disarmed");

        let _ = self.bus.publish(Envelope::new(
            Topic::EmergencyStop,
            "risk_engine",
            Payload::EmergencyStop {
                armed: false,
                reason: "manual_reset".to_string(),
            },
        ));
        Ok(())
    }
}
