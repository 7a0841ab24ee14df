mod common;

use std::sync::Arc;

use quill_client::{ClientError, DocumentCache, DocumentStore, SessionStore};
use quill_types::api::UpdateDocumentRequest;
use quill_types::models::Role;
use uuid::Uuid;

use common::{FakeBackend, ME, document};

fn setup() -> (Arc<FakeBackend>, Arc<DocumentStore>) {
    let backend = Arc::new(FakeBackend::new());
    let store = Arc::new(DocumentStore::new(backend.clone(), Arc::new(SessionStore::new())));
    (backend, store)
}

#[tokio::test]
async fn unauthenticated_mutations_never_reach_the_backend() {
    let (backend, store) = setup();
    let doc = backend.add_owned("Draft", 0);
    let update = UpdateDocumentRequest {
        content: Some("<p>changed</p>".into()),
        ..Default::default()
    };

    assert!(matches!(store.update_document(doc.id, &update).await, Err(ClientError::NotAuthenticated)));
    assert!(matches!(store.delete_document(doc.id).await, Err(ClientError::NotAuthenticated)));
    assert!(matches!(
        store.share(doc.id, "bob@example.com", Role::Editor).await,
        Err(ClientError::NotAuthenticated)
    ));
    assert!(matches!(
        store.invite(doc.id, "bob@example.com", Role::Viewer).await,
        Err(ClientError::NotAuthenticated)
    ));
    assert!(matches!(store.add_comment(doc.id, "hi", None).await, Err(ClientError::NotAuthenticated)));

    let cache = DocumentCache::new(store.clone());
    assert!(matches!(cache.edit_content(doc.id, "x"), Err(ClientError::NotAuthenticated)));

    assert!(backend.calls().is_empty(), "unexpected calls: {:?}", backend.calls());
    assert_eq!(backend.stored(doc.id).unwrap().content, "");
}

#[tokio::test]
async fn load_all_merges_owned_and_shared() {
    let (backend, store) = setup();
    store.sign_in(ME, "password").await.unwrap();

    let mine = backend.add_owned("mine", 10);
    backend.add_owned("older", 1);
    backend.add_shared(mine.clone());
    let other_owner = Uuid::new_v4();
    backend.add_shared(document(other_owner, "theirs", 20));
    backend.add_shared(document(other_owner, "ancient", -5));

    let all = store.load_all_documents().await.unwrap();
    let titles: Vec<&str> = all.iter().map(|d| d.title.as_str()).collect();
    assert_eq!(titles, ["theirs", "mine", "older", "ancient"]);
    assert_eq!(all[1].owner_id, backend.user_id);
}

#[tokio::test]
async fn share_is_validated_before_any_request() {
    let (backend, store) = setup();
    store.sign_in(ME, "password").await.unwrap();
    let doc = backend.add_owned("Roadmap", 0);

    for bad in ["", "bob", "bob@example", "bob@@example.com"] {
        assert!(matches!(
            store.share(doc.id, bad, Role::Viewer).await,
            Err(ClientError::Validation(_))
        ));
    }
    assert!(matches!(
        store.share(doc.id, "ME@example.com", Role::Editor).await,
        Err(ClientError::Validation(_))
    ));
    assert_eq!(backend.calls(), ["login"]);

    store.share(doc.id, "Bob@Example.com", Role::Viewer).await.unwrap();
    let updated = store.share(doc.id, "bob@example.com", Role::Editor).await.unwrap();
    assert_eq!(updated.role, Role::Editor);

    let grants = store.list_permissions(doc.id).await.unwrap();
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].grantee_email, "bob@example.com");
}

#[tokio::test]
async fn invite_returns_provider_message_id() {
    let (backend, store) = setup();
    store.sign_in(ME, "password").await.unwrap();
    let doc = backend.add_owned("Roadmap", 0);

    let id = store.invite(doc.id, "bob@example.com", Role::Editor).await.unwrap();
    assert_eq!(id, "msg-1");
    assert_eq!(store.list_permissions(doc.id).await.unwrap()[0].role, Role::Editor);
}

#[tokio::test]
async fn rejected_session_is_cleared() {
    let (backend, store) = setup();
    assert_eq!(store.get_session().await.unwrap(), None);

    store.sign_in(ME, "password").await.unwrap();
    assert_eq!(store.get_session().await.unwrap().unwrap().id, backend.user_id);

    backend.reject_sessions();
    assert_eq!(store.get_session().await.unwrap(), None);
    assert!(store.session().get().is_none());
}

#[tokio::test]
async fn sign_out_forgets_the_session() {
    let (backend, store) = setup();
    store.sign_up(ME, "long enough").await.unwrap();
    store.sign_out().await;

    assert!(store.session().get().is_none());
    assert_eq!(backend.calls(), ["register", "logout"]);
    assert!(matches!(store.sign_up(ME, "short").await, Err(ClientError::Validation(_))));
}

#[tokio::test]
async fn public_documents_need_no_session() {
    let (backend, store) = setup();
    let doc = backend.add_owned("Open", 0);
    assert!(matches!(
        store.get_public_document(doc.id).await,
        Err(ClientError::Api { status: 404, .. })
    ));

    store.sign_in(ME, "password").await.unwrap();
    let update = UpdateDocumentRequest {
        is_public: Some(true),
        ..Default::default()
    };
    store.update_document(doc.id, &update).await.unwrap();
    store.sign_out().await;

    assert_eq!(store.get_public_document(doc.id).await.unwrap().title, "Open");
}
