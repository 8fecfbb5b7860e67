//! 会话监管：每个对话轮次一个 CancellationToken
//!
//! 调用方断开或主动取消时，按 session_id 取消该会话上所有进行中的轮次。
//! 轮次 token 可以挂在调用方提供的父 token 下，父 token 取消时一并取消。
//! 轮次由 TurnGuard 持有，guard 被 drop（含调用方丢弃 future）时注销。

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

/// 进行中的轮次
#[derive(Debug, Clone)]
pub struct Turn {
    pub session_id: String,
    id: u64,
    token: CancellationToken,
}

impl Turn {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// 轮次登记的 RAII 守卫；drop 时从 SessionSupervisor 注销
#[derive(Debug)]
pub struct TurnGuard<'a> {
    supervisor: &'a SessionSupervisor,
    turn: Turn,
}

impl TurnGuard<'_> {
    pub fn turn(&self) -> &Turn {
        &self.turn
    }

    pub fn token(&self) -> &CancellationToken {
        self.turn.token()
    }
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        self.supervisor.end_turn(&self.turn);
    }
}

#[derive(Debug, Default)]
struct Turns {
    next_id: u64,
    by_session: HashMap<String, HashMap<u64, CancellationToken>>,
}

/// 按会话管理轮次取消令牌
#[derive(Debug, Default)]
pub struct SessionSupervisor {
    turns: Mutex<Turns>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    fn turns(&self) -> MutexGuard<'_, Turns> {
        self.turns.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 登记新轮次；parent 取消时该轮次也被取消
    pub fn begin_turn(&self, session_id: &str, parent: Option<&CancellationToken>) -> Turn {
        let token = parent.map_or_else(CancellationToken::new, CancellationToken::child_token);
        let mut turns = self.turns();
        turns.next_id += 1;
        let id = turns.next_id;
        turns
            .by_session
            .entry(session_id.to_string())
            .or_default()
            .insert(id, token.clone());
        Turn {
            session_id: session_id.to_string(),
            id,
            token,
        }
    }

    /// 登记新轮次并返回守卫
    pub fn guard_turn(&self, session_id: &str, parent: Option<&CancellationToken>) -> TurnGuard<'_> {
        TurnGuard {
            supervisor: self,
            turn: self.begin_turn(session_id, parent),
        }
    }

    pub fn end_turn(&self, turn: &Turn) {
        let mut turns = self.turns();
        if let Some(active) = turns.by_session.get_mut(&turn.session_id) {
            active.remove(&turn.id);
            if active.is_empty() {
                turns.by_session.remove(&turn.session_id);
            }
        }
    }

    /// 取消会话上所有进行中的轮次；返回是否有轮次被取消
    pub fn cancel(&self, session_id: &str) -> bool {
        let turns = self.turns();
        match turns.by_session.get(session_id) {
            Some(active) if !active.is_empty() => {
                active.values().for_each(CancellationToken::cancel);
                true
            }
            _ => false,
        }
    }

    pub fn cancel_all(&self) {
        let turns = self.turns();
        turns
            .by_session
            .values()
            .flat_map(HashMap::values)
            .for_each(CancellationToken::cancel);
    }

    pub fn active_turns(&self, session_id: &str) -> usize {
        self.turns()
            .by_session
            .get(session_id)
            .map_or(0, HashMap::len)
    }
}
