//! 协商状态机
//!
//! ```text
//! AwaitingOffer --OfferSent--> OfferSent --AnswerReceived--> AnswerReceived --IceStarted--> Negotiating
//! AwaitingOffer --AnswerSent--> Negotiating                       (远端先给出 offer)
//! Negotiating --ChannelOpened--> Established
//! 任意非终态 --Timeout / Failure--> Failed
//! ```

use crate::error::NegotiationError;
use std::fmt;

/// 单个 peer candidate 的协商状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NegotiationState {
    AwaitingOffer,
    OfferSent,
    AnswerReceived,
    Negotiating,
    Established,
    Failed,
}

/// 驱动状态迁移的事件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NegotiationEvent {
    /// 本机 offer 已发出
    OfferSent,
    /// 远端 offer 已应答
    AnswerSent,
    /// 收到与本机 offer 匹配的 answer
    AnswerReceived,
    /// 远端描述已生效，开始交换 candidate
    IceStarted,
    /// data channel 打开
    ChannelOpened,
    Timeout,
    Failure,
}

impl NegotiationState {
    /// 执行一次状态迁移；未列出的 (状态, 事件) 组合都是 [`NegotiationError::InvalidTransition`]
    pub fn advance(self, event: NegotiationEvent) -> Result<Self, NegotiationError> {
        use NegotiationEvent as E;
        use NegotiationState as S;

        let next = match (self, event) {
            (S::AwaitingOffer, E::OfferSent) => S::OfferSent,
            (S::AwaitingOffer, E::AnswerSent) => S::Negotiating,
            (S::OfferSent, E::AnswerReceived) => S::AnswerReceived,
            (S::AnswerReceived, E::IceStarted) => S::Negotiating,
            (S::Negotiating, E::ChannelOpened) => S::Established,
            (
                S::AwaitingOffer | S::OfferSent | S::AnswerReceived | S::Negotiating,
                E::Timeout | E::Failure,
            ) => S::Failed,
            (from, event) => return Err(NegotiationError::InvalidTransition { from, event }),
        };
        Ok(next)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Established | Self::Failed)
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AwaitingOffer => "awaiting-offer",
            Self::OfferSent => "offer-sent",
            Self::AnswerReceived => "answer-received",
            Self::Negotiating => "negotiating",
            Self::Established => "established",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}
