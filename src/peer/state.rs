use crate::peer::types::{Role, SdpKind};
use chrono::{DateTime, Utc};
use crate::utils::random_id;
use std::fmt;

/// Что лежит в local/remote слоте
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptionSlot {
    Empty,
    LocalOffer,
    LocalAnswer,
    RemoteOffer,
    RemoteAnswer,
}

impl DescriptionSlot {
    pub fn local(kind: SdpKind) -> Self {
        match kind {
            SdpKind::Offer => DescriptionSlot::LocalOffer,
            SdpKind::Answer => DescriptionSlot::LocalAnswer,
        }
    }

    pub fn remote(kind: SdpKind) -> Self {
        match kind {
            SdpKind::Offer => DescriptionSlot::RemoteOffer,
            SdpKind::Answer => DescriptionSlot::RemoteAnswer,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, DescriptionSlot::Empty)
    }

    pub fn is_offer(&self) -> bool {
        matches!(
            self,
            DescriptionSlot::LocalOffer | DescriptionSlot::RemoteOffer
        )
    }

    pub fn is_answer(&self) -> bool {
        matches!(
            self,
            DescriptionSlot::LocalAnswer | DescriptionSlot::RemoteAnswer
        )
    }
}

/// Фаза переговоров, выводится из пары слотов
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationPhase {
    Idle,
    Offering,
    OfferReceived,
    /// оба слота с offer; разрешается сразу же
    Glare,
    Stable,
}

impl fmt::Display for NegotiationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Состояние переговоров одной сессии
#[derive(Debug, Clone)]
pub struct NegotiationState {
    pub role: Role,
    pub room_id: String,
    pub local: DescriptionSlot,
    pub remote: DescriptionSlot,
    /// id текущего поколения handle, только для логов
    pub session_id: String,
    /// растёт при каждой замене handle; устаревшие результаты отбрасываются
    pub epoch: u64,
    /// когда началось текущее поколение
    pub started_at: DateTime<Utc>,
}

impl NegotiationState {
    pub fn new(room_id: impl Into<String>, role: Role) -> Self {
        Self {
            role,
            room_id: room_id.into(),
            local: DescriptionSlot::Empty,
            remote: DescriptionSlot::Empty,
            session_id: random_id(),
            epoch: 0,
            started_at: Utc::now(),
        }
    }

    pub fn phase(&self) -> NegotiationPhase {
        use DescriptionSlot::*;
        match (self.local, self.remote) {
            (Empty, Empty) => NegotiationPhase::Idle,
            (LocalOffer, Empty) => NegotiationPhase::Offering,
            (Empty, RemoteOffer) => NegotiationPhase::OfferReceived,
            (LocalOffer, RemoteOffer) => NegotiationPhase::Glare,
            // ответ с любой стороны завершает раунд
            _ => NegotiationPhase::Stable,
        }
    }

    /// Новый handle: слоты пустые, новое поколение
    pub fn next_generation(&mut self) -> u64 {
        self.local = DescriptionSlot::Empty;
        self.remote = DescriptionSlot::Empty;
        self.session_id = random_id();
        self.epoch += 1;
        self.started_at = Utc::now();
        self.epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_follow_slots() {
        let mut st = NegotiationState::new("room", Role::Caller);
        assert_eq!(st.phase(), NegotiationPhase::Idle);

        st.local = DescriptionSlot::LocalOffer;
        assert_eq!(st.phase(), NegotiationPhase::Offering);

        st.remote = DescriptionSlot::RemoteOffer;
        assert_eq!(st.phase(), NegotiationPhase::Glare);

        st.remote = DescriptionSlot::RemoteAnswer;
        assert_eq!(st.phase(), NegotiationPhase::Stable);

        st.local = DescriptionSlot::Empty;
        st.remote = DescriptionSlot::RemoteOffer;
        assert_eq!(st.phase(), NegotiationPhase::OfferReceived);

        st.local = DescriptionSlot::LocalAnswer;
        assert_eq!(st.phase(), NegotiationPhase::Stable);
    }

    #[test]
    fn next_generation_clears_slots() {
        let mut st = NegotiationState::new("room", Role::Callee);
        let first_id = st.session_id.clone();
        let created = st.started_at;
        st.local = DescriptionSlot::LocalOffer;

        assert_eq!(st.next_generation(), 1);
        assert_eq!(st.phase(), NegotiationPhase::Idle);
        assert_ne!(st.session_id, first_id);
        assert!(st.started_at >= created);
        assert_eq!(st.role, Role::Callee);
    }

    #[test]
    fn slot_constructors() {
        assert_eq!(DescriptionSlot::local(SdpKind::Offer), DescriptionSlot::LocalOffer);
        assert_eq!(DescriptionSlot::remote(SdpKind::Answer), DescriptionSlot::RemoteAnswer);
        assert!(DescriptionSlot::RemoteOffer.is_offer());
        assert!(DescriptionSlot::LocalAnswer.is_answer());
        assert!(DescriptionSlot::Empty.is_empty());
    }
}
