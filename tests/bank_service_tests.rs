use question_bank::{
    BankError, BankService, ClozeBlank, CreatePdfAnchorRequest, CreateQuestionRequest, CreateSubjectRequest,
    CreateTopicRequest, Database, EntityStore, QuestionOption, QuestionPayload, UpdateQuestionRequest,
    UpdateSubjectRequest, UpdateTopicRequest, compute_content_hash,
};
use std::sync::Arc;

async fn service() -> BankService {
    let store: Arc<dyn EntityStore> = Arc::new(Database::new("sqlite::memory:").await.unwrap());
    BankService::new(store)
}

fn subject_named(name: &str) -> CreateSubjectRequest {
    CreateSubjectRequest {
        name: name.to_string(),
        ..Default::default()
    }
}

fn topic_titled(title: &str) -> CreateTopicRequest {
    CreateTopicRequest {
        title: title.to_string(),
        ..Default::default()
    }
}

fn test_question(subject_id: &str, topic_id: &str, prompt: &str) -> CreateQuestionRequest {
    CreateQuestionRequest {
        subject_id: subject_id.to_string(),
        topic_id: topic_id.to_string(),
        topic_ids: None,
        prompt: prompt.to_string(),
        explanation: None,
        difficulty: None,
        tags: None,
        origin: None,
        pdf_anchor_id: None,
        payload: QuestionPayload::Test {
            options: vec![
                QuestionOption { id: "a".into(), text: "O(n)".into() },
                QuestionOption { id: "b".into(), text: "O(log n)".into() },
            ],
            correct_option_ids: vec!["b".into()],
        },
    }
}

#[tokio::test]
async fn test_subject_slug_uniqueness() {
    let service = service().await;

    let subject = service.create_subject(subject_named("Bases de Datos II")).await.unwrap();
    assert_eq!(subject.name, "Bases de Datos II");

    let clash = service.create_subject(subject_named("  bases de datos ii ")).await;
    assert!(matches!(clash, Err(BankError::Duplicate(_))));

    let empty = service.create_subject(subject_named("¿?")).await;
    assert!(matches!(empty, Err(BankError::Validation(_))));

    let other = service.create_subject(subject_named("Redes")).await.unwrap();
    let rename = service
        .update_subject(
            &other.id,
            UpdateSubjectRequest {
                name: Some("Bases de Datos II".to_string()),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(rename, Err(BankError::Duplicate(_))));

    // Renaming a subject to a variant of its own name is fine.
    let renamed = service
        .update_subject(
            &subject.id,
            UpdateSubjectRequest {
                name: Some("Bases de datos II".to_string()),
                color: Some("#3366ff".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(renamed.color.as_deref(), Some("#3366ff"));

    assert!(service.update_subject("missing", UpdateSubjectRequest::default()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_topics_are_ordered_and_unique_within_subject() {
    let service = service().await;
    let algebra = service.create_subject(subject_named("Álgebra")).await.unwrap();
    let calculus = service.create_subject(subject_named("Cálculo")).await.unwrap();

    let first = service.create_topic(&algebra.id, topic_titled("Matrices")).await.unwrap();
    let second = service.create_topic(&algebra.id, topic_titled("Espacios vectoriales")).await.unwrap();
    assert_eq!(first.order, 0);
    assert_eq!(second.order, 1);

    let clash = service.create_topic(&algebra.id, topic_titled("matrices")).await;
    assert!(matches!(clash, Err(BankError::Duplicate(_))));

    // Same title in another subject is a different topic.
    service.create_topic(&calculus.id, topic_titled("Matrices")).await.unwrap();

    let orphan = service.create_topic("missing", topic_titled("Límites")).await;
    assert!(matches!(orphan, Err(BankError::NotFound(_))));

    let titles: Vec<String> = service
        .list_topics(&algebra.id)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.title)
        .collect();
    assert_eq!(titles, vec!["Matrices".to_string(), "Espacios vectoriales".to_string()]);
}

#[tokio::test]
async fn test_create_question_computes_hash() {
    let service = service().await;
    let subject = service.create_subject(subject_named("Algoritmos")).await.unwrap();
    let topic = service.create_topic(&subject.id, topic_titled("Búsqueda")).await.unwrap();

    let question = service
        .create_question(test_question(&subject.id, &topic.id, "Coste de la búsqueda binaria"))
        .await
        .unwrap();

    assert_eq!(question.content_hash, Some(compute_content_hash(&question, "busqueda")));
    assert_eq!(question.stats.seen, 0);

    let invalid = service
        .create_question(CreateQuestionRequest {
            payload: QuestionPayload::Completar {
                cloze_text: "La búsqueda binaria requiere datos {{b1}}".to_string(),
                blanks: vec![ClozeBlank { id: "b1".into(), accepted: vec![] }],
            },
            ..test_question(&subject.id, &topic.id, "Completa")
        })
        .await;
    assert!(matches!(invalid, Err(BankError::Validation(_))));

    let blank_prompt = service.create_question(test_question(&subject.id, &topic.id, "   ")).await;
    assert!(matches!(blank_prompt, Err(BankError::Validation(_))));

    let other = service.create_subject(subject_named("Redes")).await.unwrap();
    let cross = service.create_question(test_question(&other.id, &topic.id, "x")).await;
    match cross {
        Err(err @ BankError::Resolution(_)) => {
            assert_eq!(err.kind(), "resolution");
            assert!(err.to_string().contains("belongs to another subject"));
        }
        other => panic!("expected resolution error, got {:?}", other.map(|q| q.id)),
    }
}

#[tokio::test]
async fn test_question_type_is_immutable_and_hash_follows_edits() {
    let service = service().await;
    let subject = service.create_subject(subject_named("Algoritmos")).await.unwrap();
    let topic = service.create_topic(&subject.id, topic_titled("Búsqueda")).await.unwrap();
    let question = service
        .create_question(test_question(&subject.id, &topic.id, "Coste de la búsqueda binaria"))
        .await
        .unwrap();

    let change_type = service
        .update_question(
            &question.id,
            UpdateQuestionRequest {
                payload: Some(QuestionPayload::Desarrollo { model_answer: None, keywords: None }),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(change_type, Err(BankError::Validation(_))));

    let edited = service
        .update_question(
            &question.id,
            UpdateQuestionRequest {
                prompt: Some("Coste temporal de la búsqueda binaria".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .unwrap();
    assert_ne!(edited.content_hash, question.content_hash);
    assert_eq!(edited.content_hash, Some(compute_content_hash(&edited, "busqueda")));
}

#[tokio::test]
async fn test_topic_rename_rehashes_its_questions() {
    let service = service().await;
    let subject = service.create_subject(subject_named("Algoritmos")).await.unwrap();
    let search = service.create_topic(&subject.id, topic_titled("Búsqueda")).await.unwrap();
    let sorting = service.create_topic(&subject.id, topic_titled("Ordenación")).await.unwrap();

    let filed = service
        .create_question(test_question(&subject.id, &search.id, "Coste de la búsqueda binaria"))
        .await
        .unwrap();
    let elsewhere = service
        .create_question(test_question(&subject.id, &sorting.id, "Coste de quicksort"))
        .await
        .unwrap();

    service
        .update_topic(
            &search.id,
            UpdateTopicRequest {
                title: Some("Búsqueda en vectores".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .unwrap();

    let filed_after = service.get_question(&filed.id).await.unwrap().unwrap();
    let elsewhere_after = service.get_question(&elsewhere.id).await.unwrap().unwrap();
    assert_eq!(
        filed_after.content_hash,
        Some(compute_content_hash(&filed_after, "busqueda-en-vectores"))
    );
    assert_eq!(elsewhere_after.content_hash, elsewhere.content_hash);

    let report = service.rehash_questions(true).await.unwrap();
    assert_eq!(report.examined, 2);
    assert!(report.changed_question_ids.is_empty());
}

#[tokio::test]
async fn test_deleted_topic_resolves_to_none() {
    let service = service().await;
    let subject = service.create_subject(subject_named("Algoritmos")).await.unwrap();
    let topic = service.create_topic(&subject.id, topic_titled("Grafos")).await.unwrap();
    let question = service
        .create_question(test_question(&subject.id, &topic.id, "Coste de Dijkstra"))
        .await
        .unwrap();

    assert!(service.resolve_topic(&question).await.unwrap().is_some());
    assert!(service.delete_topic(&topic.id).await.unwrap());

    let question = service.get_question(&question.id).await.unwrap().unwrap();
    assert_eq!(question.topic_id, topic.id);
    assert!(service.resolve_topic(&question).await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_subject_cascades() {
    let service = service().await;
    let store = service.store();
    let doomed = service.create_subject(subject_named("Historia")).await.unwrap();
    let kept = service.create_subject(subject_named("Geografía")).await.unwrap();

    let topic = service.create_topic(&doomed.id, topic_titled("Edad Media")).await.unwrap();
    let kept_topic = service.create_topic(&kept.id, topic_titled("Ríos")).await.unwrap();
    service
        .create_question(test_question(&doomed.id, &topic.id, "Fecha de la caída de Constantinopla"))
        .await
        .unwrap();
    service
        .create_question(test_question(&kept.id, &kept_topic.id, "Río más largo de España"))
        .await
        .unwrap();
    service
        .create_pdf_anchor(
            &doomed.id,
            CreatePdfAnchorRequest {
                topic_id: None,
                pdf_id: "temario".to_string(),
                page: 4,
                label: None,
            },
        )
        .await
        .unwrap();

    assert!(service.delete_subject(&doomed.id).await.unwrap());
    assert!(!service.delete_subject(&doomed.id).await.unwrap());

    assert_eq!(service.list_subjects().await.unwrap().len(), 1);
    assert_eq!(store.list_all_topics().await.unwrap().len(), 1);
    assert_eq!(store.list_all_questions().await.unwrap().len(), 1);
    assert!(store.list_pdf_anchors().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_pdf_anchor_validation() {
    let service = service().await;
    let subject = service.create_subject(subject_named("Física")).await.unwrap();

    let empty_pdf = service
        .create_pdf_anchor(
            &subject.id,
            CreatePdfAnchorRequest {
                topic_id: None,
                pdf_id: " ".to_string(),
                page: 1,
                label: None,
            },
        )
        .await;
    assert!(matches!(empty_pdf, Err(BankError::Validation(_))));

    let anchor = service
        .create_pdf_anchor(
            &subject.id,
            CreatePdfAnchorRequest {
                topic_id: None,
                pdf_id: "libro".to_string(),
                page: 120,
                label: Some("Leyes de Newton".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(service.list_pdf_anchors(&subject.id).await.unwrap(), vec![anchor]);
}
