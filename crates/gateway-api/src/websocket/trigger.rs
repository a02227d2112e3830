//! 병합형(coalesced) 트리거.
//!
//! 용량 1인 채널에 `try_send`로 신호를 넣습니다. 소비되기 전에 들어온 신호들은
//! 하나로 합쳐지며 보내는 쪽은 절대 대기하지 않습니다.

use tokio::sync::mpsc;

/// 트리거 송신 측. 복제해서 여러 곳에서 사용할 수 있습니다.
#[derive(Debug, Clone)]
pub struct CoalescedTrigger {
    tx: mpsc::Sender<()>,
}

/// 트리거 수신 측 (루프 하나가 소유).
#[derive(Debug)]
pub struct TriggerReceiver {
    rx: mpsc::Receiver<()>,
}

impl CoalescedTrigger {
    /// 새 트리거 쌍 생성.
    pub fn new() -> (Self, TriggerReceiver) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, TriggerReceiver { rx })
    }

    /// 신호를 보냅니다.
    ///
    /// 이미 대기 중인 신호가 있거나 수신 측이 사라졌으면 `false`.
    pub fn fire(&self) -> bool {
        self.tx.try_send(()).is_ok()
    }
}

impl TriggerReceiver {
    /// 다음 신호를 기다립니다. 모든 송신 측이 사라지면 `None`.
    pub async fn recv(&mut self) -> Option<()> {
        self.rx.recv().await
    }
}
