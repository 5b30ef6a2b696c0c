use crate::engine::ParticipantId;
use crate::errors::{LedgerError, LedgerResult};
use crate::participant::{Participant, ParticipantKind, ParticipantRecord, ParticipantRef};
use crate::store::{LedgerState, LedgerStore};
use tracing::debug;

/// Looks a participant up in the table its kind names. A student id asked
/// for as staff (or the reverse) is not found.
pub fn resolve_record(state: &LedgerState, participant: ParticipantRef) -> LedgerResult<&ParticipantRecord> {
    match state.participant(&participant.id) {
        Some(record) if record.kind() == participant.kind => Ok(record),
        _ => Err(LedgerError::ParticipantNotFound {
            id: participant.id,
            kind: participant.kind,
        }),
    }
}

#[derive(Clone, Debug)]
pub struct ParticipantResolver {
    store: LedgerStore,
}

impl ParticipantResolver {
    pub fn new(store: LedgerStore) -> Self {
        ParticipantResolver { store }
    }

    pub async fn resolve(&self, id: ParticipantId, kind: ParticipantKind) -> LedgerResult<Participant> {
        let state = self.store.read().await?;
        let participant = resolve_record(&state, ParticipantRef { id, kind })?.view();
        debug!(%id, %kind, "participant resolved");
        Ok(participant)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::participant::{StaffUser, Student};
    use std::time::Duration;
    use uuid::Uuid;

    async fn seeded() -> (ParticipantResolver, Uuid, Uuid) {
        let store = LedgerStore::new(Duration::from_millis(100));
        let student = Uuid::new_v4();
        let staff = Uuid::new_v4();
        store
            .insert_student(Student::new(student, "Ana", Uuid::new_v4(), 40))
            .await
            .unwrap();
        store.insert_staff(StaffUser::new(staff, "Coach Lee")).await.unwrap();
        (ParticipantResolver::new(store), student, staff)
    }

    #[tokio::test]
    async fn resolves_both_kinds() {
        let (resolver, student, staff) = seeded().await;
        let ana = resolver.resolve(student, ParticipantKind::Student).await.unwrap();
        assert_eq!(ana.display_name, "Ana");
        assert_eq!(ana.balance, 40);
        let coach = resolver.resolve(staff, ParticipantKind::Staff).await.unwrap();
        assert_eq!(coach.balance, 0);
    }

    #[tokio::test]
    async fn kind_mismatch_is_not_found() {
        let (resolver, student, staff) = seeded().await;
        assert!(matches!(
            resolver.resolve(student, ParticipantKind::Staff).await,
            Err(LedgerError::ParticipantNotFound { kind: ParticipantKind::Staff, .. })
        ));
        assert!(matches!(
            resolver.resolve(staff, ParticipantKind::Student).await,
            Err(LedgerError::ParticipantNotFound { kind: ParticipantKind::Student, .. })
        ));
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let (resolver, _, _) = seeded().await;
        let err = resolver
            .resolve(Uuid::new_v4(), ParticipantKind::Student)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::ParticipantNotFound { .. }));
    }
}
