use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use question_bank::merge_engine::IssueKind;
use question_bank::{
    BankError, BankService, ContributionMerger, CreateQuestionRequest, CreateSubjectRequest, CreateTopicRequest,
    Database, EntityStore, MergeOptions, QuestionOption, QuestionPayload, build_contribution_pack,
    parse_contribution_pack, slugify,
};
use serde_json::{Value, json};
use std::sync::Arc;

async fn memory_store() -> Arc<dyn EntityStore> {
    Arc::new(Database::new("sqlite::memory:").await.unwrap())
}

fn networks_pack(pack_id: &str, author: &str, questions: Vec<Value>) -> Value {
    json!({
        "version": 1,
        "kind": "contribution",
        "packId": pack_id,
        "createdBy": author,
        "createdAt": "2024-05-01T10:00:00Z",
        "targets": [{
            "subjectKey": "redes",
            "subjectName": "Redes",
            "topics": [
                {"topicKey": "tcp", "topicTitle": "TCP"},
                {"topicKey": "udp", "topicTitle": "UDP"},
                {"topicKey": "enrutamiento", "topicTitle": "Enrutamiento"}
            ]
        }],
        "questions": questions,
    })
}

fn handshake_question(id: &str, options: Value, correct: Value) -> Value {
    json!({
        "id": id,
        "subjectKey": "redes",
        "topicKey": "tcp",
        "type": "TEST",
        "prompt": "¿Cuántos pasos tiene el handshake de TCP?",
        "options": options,
        "correctOptionIds": correct,
    })
}

fn sample_questions() -> Vec<Value> {
    vec![
        handshake_question(
            "q-1",
            json!([{"id": "a", "text": "Dos"}, {"id": "b", "text": "Tres"}]),
            json!(["b"]),
        ),
        json!({
            "id": "q-2",
            "subjectKey": "redes",
            "topicKey": "udp",
            "topicKeys": ["udp", "tcp"],
            "type": "DESARROLLO",
            "prompt": "Compara UDP con TCP",
            "modelAnswer": "UDP no garantiza entrega",
            "keywords": ["entrega", "orden"]
        }),
        json!({
            "id": "q-3",
            "subjectKey": "redes",
            "topicKey": "tcp",
            "type": "COMPLETAR",
            "prompt": "Completa",
            "clozeText": "TCP es un protocolo orientado a {{b1}}",
            "blanks": [{"id": "b1", "accepted": ["conexión", "conexion"]}]
        }),
    ]
}

#[tokio::test]
async fn test_merge_creates_entities_and_is_idempotent() {
    let store = memory_store().await;
    let merger = ContributionMerger::new(Arc::clone(&store));
    let pack = networks_pack("pack-1", "ana", sample_questions()).to_string();

    let first = merger.merge_json(&pack).await.unwrap();
    assert_eq!(first.pack_id, "pack-1");
    assert_eq!(first.subjects_created, 1);
    assert_eq!(first.topics_created, 3);
    assert_eq!(first.questions_imported, 3);
    assert_eq!(first.questions_deduplicated, 0);
    assert!(first.errors.is_empty(), "unexpected issues: {:?}", first.errors);

    let subjects = store.list_subjects().await.unwrap();
    assert_eq!(subjects.len(), 1);
    assert_eq!(subjects[0].name, "Redes");

    let questions = store.list_questions(&subjects[0].id).await.unwrap();
    assert_eq!(questions.len(), 3);
    for question in &questions {
        assert!(first.imported_question_ids.contains(&question.id));
        assert_ne!(question.id, "q-1");
        assert_eq!(question.source_pack_id.as_deref(), Some("pack-1"));
        assert_eq!(question.created_by.as_deref(), Some("ana"));
        assert!(question.content_hash.as_deref().unwrap().starts_with("sha256:"));
        assert_eq!(question.stats.seen, 0);
    }

    let second = merger.merge_json(&pack).await.unwrap();
    assert_eq!(second.subjects_created, 0);
    assert_eq!(second.topics_created, 0);
    assert_eq!(second.questions_imported, 0);
    assert_eq!(second.questions_deduplicated, 3);
    assert_eq!(second.deduplicated.len(), 3);
    for record in &second.deduplicated {
        assert!(first.imported_question_ids.contains(&record.existing_question_id));
    }

    assert_eq!(store.list_all_questions().await.unwrap().len(), 3);
    assert_eq!(store.list_all_topics().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_same_question_from_different_authors_is_deduplicated() {
    let store = memory_store().await;
    let merger = ContributionMerger::new(Arc::clone(&store));

    let from_ana = networks_pack(
        "pack-ana",
        "ana",
        vec![handshake_question(
            "ana-1",
            json!([{"id": "a", "text": "Dos"}, {"id": "b", "text": "Tres"}]),
            json!(["b"]),
        )],
    );
    let from_luis = networks_pack(
        "pack-luis",
        "luis",
        vec![handshake_question(
            "luis-77",
            json!([{"id": "opt-2", "text": "  tres "}, {"id": "opt-1", "text": "Dos"}]),
            json!(["opt-2"]),
        )],
    );

    let first = merger.merge(&parse_contribution_pack(&from_ana.to_string()).unwrap()).await.unwrap();
    let second = merger.merge(&parse_contribution_pack(&from_luis.to_string()).unwrap()).await.unwrap();

    assert_eq!(first.questions_imported, 1);
    assert_eq!(second.questions_imported, 0);
    assert_eq!(second.questions_deduplicated, 1);
    assert_eq!(second.deduplicated[0].existing_question_id, first.imported_question_ids[0]);
}

#[tokio::test]
async fn test_different_correct_answer_is_not_deduplicated() {
    let store = memory_store().await;
    let merger = ContributionMerger::new(Arc::clone(&store));
    let options = json!([{"id": "a", "text": "Dos"}, {"id": "b", "text": "Tres"}]);

    let right = networks_pack("p1", "ana", vec![handshake_question("1", options.clone(), json!(["b"]))]);
    let wrong = networks_pack("p2", "luis", vec![handshake_question("2", options, json!(["a"]))]);

    merger.merge_json(&right.to_string()).await.unwrap();
    let summary = merger.merge_json(&wrong.to_string()).await.unwrap();

    assert_eq!(summary.questions_imported, 1);
    assert_eq!(store.list_all_questions().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_unresolved_and_invalid_questions_are_reported_per_item() {
    let store = memory_store().await;
    let merger = ContributionMerger::new(Arc::clone(&store));

    let mut questions = sample_questions();
    questions.push(json!({
        "id": "bad-topic",
        "subjectKey": "redes",
        "topicKey": "ipv6",
        "type": "DESARROLLO",
        "prompt": "Explica IPv6"
    }));
    questions.push(json!({
        "id": "bad-subject",
        "subjectKey": "sistemas-operativos",
        "topicKey": "tcp",
        "type": "DESARROLLO",
        "prompt": "Explica los procesos"
    }));
    questions.push(json!({
        "id": "no-options",
        "subjectKey": "redes",
        "topicKey": "tcp",
        "type": "TEST",
        "prompt": "Sin opciones",
        "options": [],
        "correctOptionIds": []
    }));
    questions.push(json!({"id": "unknown-type", "subjectKey": "redes", "topicKey": "tcp", "type": "ENSAYO", "prompt": "x"}));

    let summary = merger
        .merge_json(&networks_pack("pack-mixed", "ana", questions).to_string())
        .await
        .unwrap();

    assert_eq!(summary.questions_imported, 3);
    assert_eq!(summary.errors.len(), 4);

    let by_id = |id: &str| summary.errors.iter().find(|e| e.question_id.as_deref() == Some(id)).unwrap();
    assert_eq!(by_id("bad-topic").kind, IssueKind::Resolution);
    assert_eq!(by_id("bad-topic").index, Some(3));
    assert_eq!(by_id("bad-subject").kind, IssueKind::Resolution);
    assert_eq!(by_id("no-options").kind, IssueKind::Validation);
    assert_eq!(by_id("unknown-type").kind, IssueKind::Validation);
}

#[tokio::test]
async fn test_rejected_pack_writes_nothing() {
    let store = memory_store().await;
    let merger = ContributionMerger::new(Arc::clone(&store));

    let mut pack = networks_pack("pack-1", "ana", sample_questions());
    pack["kind"] = json!("bank");

    let result = merger.merge_json(&pack.to_string()).await;
    assert!(matches!(result, Err(BankError::Validation(_))));
    assert!(store.list_subjects().await.unwrap().is_empty());
    assert!(store.list_all_questions().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_existing_subject_and_topic_are_resolved_by_slug() {
    let store = memory_store().await;
    let service = BankService::new(Arc::clone(&store));

    let subject = service
        .create_subject(CreateSubjectRequest {
            name: "Bases de Datos II".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    let topic = service
        .create_topic(
            &subject.id,
            CreateTopicRequest {
                title: "Normalización".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let pack = json!({
        "version": 1,
        "kind": "contribution",
        "packId": "bd-pack",
        "targets": [{
            "subjectKey": "bases-de-datos-ii",
            "subjectName": "Bases de datos II",
            "topics": [
                {"topicKey": "normalizacion", "topicTitle": "Normalizacion"},
                {"topicKey": "indices", "topicTitle": "Índices"}
            ]
        }],
        "questions": [{
            "subjectKey": "bases-de-datos-ii",
            "topicKey": "normalizacion",
            "type": "DESARROLLO",
            "prompt": "Define 3FN"
        }]
    });

    let summary = ContributionMerger::new(Arc::clone(&store))
        .merge_json(&pack.to_string())
        .await
        .unwrap();

    assert_eq!(summary.subjects_created, 0);
    assert_eq!(summary.topics_created, 1);

    let topics = store.list_topics(&subject.id).await.unwrap();
    assert_eq!(topics.len(), 2);
    assert_eq!(topics[0].id, topic.id);
    assert_eq!(topics[1].title, "Índices");
    assert_eq!(topics[1].order, topics[0].order + 1);

    let question = store
        .get_question(&summary.imported_question_ids[0])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(question.subject_id, subject.id);
    assert_eq!(question.topic_id, topic.id);
    assert!(question.created_by.is_none());
}

#[tokio::test]
async fn test_topic_keys_map_to_local_ids() {
    let store = memory_store().await;
    let summary = ContributionMerger::new(Arc::clone(&store))
        .merge_json(&networks_pack("pack-1", "ana", sample_questions()).to_string())
        .await
        .unwrap();

    let question = store
        .get_question(&summary.imported_question_ids[1])
        .await
        .unwrap()
        .unwrap();
    let subject_id = question.subject_id.clone();
    let topics = store.list_topics(&subject_id).await.unwrap();
    let id_of = |title: &str| topics.iter().find(|t| t.title == title).unwrap().id.clone();

    assert_eq!(question.topic_id, id_of("UDP"));
    assert_eq!(question.topic_ids, Some(vec![id_of("UDP"), id_of("TCP")]));
}

fn image_question(id: &str, filename: &str) -> Value {
    json!({
        "id": id,
        "subjectKey": "redes",
        "topicKey": "enrutamiento",
        "type": "DESARROLLO",
        "prompt": format!("Analiza la topología {}", id),
        "explanation": format!("![topologia](question-images/{})", filename)
    })
}

#[tokio::test]
async fn test_referenced_images_are_imported_once() {
    let store = memory_store().await;
    let merger = ContributionMerger::new(Arc::clone(&store));
    let png = BASE64.encode(b"\x89PNG fake image bytes");

    let mut first = networks_pack("img-1", "ana", vec![image_question("r1", "3c1d.png")]);
    first["questionImages"] = json!({
        "3c1d.png": format!("data:image/png;base64,{}", png),
        "unused.png": png,
    });

    let summary = merger.merge_json(&first.to_string()).await.unwrap();
    assert_eq!(summary.images_imported, 1);
    assert_eq!(summary.images_skipped, 0);

    let image = store.get_image_by_filename("3c1d.png").await.unwrap().unwrap();
    assert_eq!(image.id, "3c1d");
    assert_eq!(image.mime_type, "image/png");
    assert_eq!(image.blob, b"\x89PNG fake image bytes");
    assert!(store.get_image_by_filename("unused.png").await.unwrap().is_none());

    let mut second = networks_pack("img-2", "luis", vec![image_question("r2", "3c1d.png")]);
    second["questionImages"] = json!({"3c1d.png": BASE64.encode(b"other bytes")});

    let summary = merger.merge_json(&second.to_string()).await.unwrap();
    assert_eq!(summary.questions_imported, 1);
    assert_eq!(summary.images_imported, 0);
    assert_eq!(summary.images_skipped, 1);

    let image = store.get_image_by_filename("3c1d.png").await.unwrap().unwrap();
    assert_eq!(image.blob, b"\x89PNG fake image bytes");
}

#[tokio::test]
async fn test_oversized_and_invalid_images_are_reported() {
    let store = memory_store().await;
    let merger = ContributionMerger::with_options(Arc::clone(&store), MergeOptions { max_image_bytes: 8 });

    let mut pack = networks_pack(
        "img-bad",
        "ana",
        vec![
            image_question("big", "big.png"),
            image_question("garbled", "garbled.jpg"),
            image_question("small", "small.gif"),
        ],
    );
    pack["questionImages"] = json!({
        "big.png": BASE64.encode([0u8; 64]),
        "garbled.jpg": "%%% not base64 %%%",
        "small.gif": BASE64.encode(b"GIF89a"),
    });

    let summary = merger.merge_json(&pack.to_string()).await.unwrap();
    assert_eq!(summary.questions_imported, 3);
    assert_eq!(summary.images_imported, 1);

    let image_issues: Vec<_> = summary.errors.iter().filter(|e| e.kind == IssueKind::Image).collect();
    assert_eq!(image_issues.len(), 2);
    assert!(store.get_image_by_filename("big.png").await.unwrap().is_none());
    assert_eq!(
        store.get_image_by_filename("small.gif").await.unwrap().unwrap().mime_type,
        "image/gif"
    );
}

#[tokio::test]
async fn test_built_pack_round_trips_between_banks() {
    let origin = memory_store().await;
    let service = BankService::new(Arc::clone(&origin));

    let subject = service
        .create_subject(CreateSubjectRequest {
            name: "Álgebra".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    let topic = service
        .create_topic(
            &subject.id,
            CreateTopicRequest {
                title: "Matrices".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    service
        .create_question(CreateQuestionRequest {
            subject_id: subject.id.clone(),
            topic_id: topic.id.clone(),
            topic_ids: None,
            prompt: "¿Es invertible una matriz con determinante 0?".to_string(),
            explanation: None,
            difficulty: Some(2),
            tags: None,
            origin: None,
            pdf_anchor_id: None,
            payload: QuestionPayload::Test {
                options: vec![
                    QuestionOption { id: "si".into(), text: "Sí".into() },
                    QuestionOption { id: "no".into(), text: "No".into() },
                ],
                correct_option_ids: vec!["no".into()],
            },
        })
        .await
        .unwrap();

    let pack = build_contribution_pack(origin.as_ref(), &[subject.id.clone()], Some("ana".to_string()))
        .await
        .unwrap();
    assert_eq!(pack.targets[0].subject_key, "algebra");
    let json = pack.to_json().unwrap();

    let recipient = memory_store().await;
    let summary = ContributionMerger::new(Arc::clone(&recipient)).merge_json(&json).await.unwrap();
    assert_eq!(summary.subjects_created, 1);
    assert_eq!(summary.questions_imported, 1);

    // Merging a bank's own export back into it changes nothing.
    let echo = ContributionMerger::new(Arc::clone(&origin)).merge_json(&json).await.unwrap();
    assert_eq!(echo.subjects_created, 0);
    assert_eq!(echo.questions_imported, 0);
    assert_eq!(echo.questions_deduplicated, 1);
}

#[tokio::test]
async fn test_images_sharing_a_stem_are_reported_per_item() {
    let store = memory_store().await;
    let merger = ContributionMerger::new(Arc::clone(&store));

    let mut pack = networks_pack(
        "img-stem",
        "ana",
        vec![image_question("r1", "abc.png"), image_question("r2", "abc.jpg")],
    );
    pack["questionImages"] = json!({
        "abc.png": BASE64.encode(b"png bytes"),
        "abc.jpg": BASE64.encode(b"jpg bytes"),
    });

    let summary = merger.merge_json(&pack.to_string()).await.unwrap();
    assert_eq!(summary.questions_imported, 2);
    assert_eq!(summary.images_imported, 1);

    let image_issues: Vec<_> = summary.errors.iter().filter(|e| e.kind == IssueKind::Image).collect();
    assert_eq!(image_issues.len(), 1);
    assert!(image_issues[0].message.contains("abc.png"));
    assert!(image_issues[0].message.contains("already taken by 'abc.jpg'"));

    // Filenames iterate in sorted order, so the jpg claims the id first.
    let stored = store.get_image("abc").await.unwrap().unwrap();
    assert_eq!(stored.filename, "abc.jpg");
    assert_eq!(stored.mime_type, "image/jpeg");
    assert!(store.get_image_by_filename("abc.png").await.unwrap().is_none());

    let rerun = merger.merge_json(&pack.to_string()).await.unwrap();
    assert_eq!(rerun.questions_deduplicated, 2);
    assert!(rerun.errors.is_empty(), "unexpected issues: {:?}", rerun.errors);
}

#[tokio::test]
async fn test_keys_that_differ_from_names_merge_idempotently() {
    let store = memory_store().await;
    let merger = ContributionMerger::new(Arc::clone(&store));
    let question = json!({
        "subjectKey": "bd2",
        "topicKey": "t1",
        "type": "DESARROLLO",
        "prompt": "Define la tercera forma normal",
    });
    let pack = json!({
        "version": 1,
        "kind": "contribution",
        "packId": "bd2-pack",
        "targets": [{
            "subjectKey": "bd2",
            "subjectName": "Bases de Datos II",
            "topics": [{"topicKey": "t1", "topicTitle": "Normalización"}]
        }],
        "questions": [question.clone(), question],
    })
    .to_string();

    let first = merger.merge_json(&pack).await.unwrap();
    assert_eq!(first.subjects_created, 1);
    assert_eq!(first.topics_created, 1);
    assert_eq!(first.questions_imported, 1);
    assert_eq!(first.questions_deduplicated, 1);
    assert_eq!(first.deduplicated[0].index, 1);
    assert_eq!(first.deduplicated[0].existing_question_id, first.imported_question_ids[0]);

    let subjects = store.list_subjects().await.unwrap();
    assert_eq!(subjects.len(), 1);
    assert_eq!(subjects[0].name, "Bases de Datos II");
    assert_ne!(slugify(&subjects[0].name), "bd2");

    let second = merger.merge_json(&pack).await.unwrap();
    assert_eq!(second.subjects_created, 0);
    assert_eq!(second.topics_created, 0);
    assert_eq!(second.questions_imported, 0);
    assert_eq!(second.questions_deduplicated, 2);

    assert_eq!(store.list_subjects().await.unwrap().len(), 1);
    assert_eq!(store.list_all_topics().await.unwrap().len(), 1);
    assert_eq!(store.list_all_questions().await.unwrap().len(), 1);
}
