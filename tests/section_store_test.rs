//! Section Store 集成测试：排序、重编号、历史与并发

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use scribe::core::StoreError;
use scribe::paper::outline::{is_contiguous, paths_consistent};
use scribe::paper::{MoveAction, NewSection, Section, SectionStore, SectionUpdate};
use scribe::storage::MemoryRepository;

fn store() -> Arc<SectionStore> {
    SectionStore::with_repository(
        Arc::new(MemoryRepository::new()),
        2,
        Duration::from_millis(50),
    )
}

async fn paper(store: &SectionStore, titles: &[&str]) -> (String, Vec<Section>) {
    let doc = store.create_document("Paper", None).await.unwrap();
    let mut sections = Vec::new();
    for title in titles {
        sections.push(store.create(&doc.id, NewSection::titled(*title)).await.unwrap());
    }
    (doc.id, sections)
}

fn titles(sections: &[Section]) -> Vec<&str> {
    sections.iter().map(|s| s.title.as_str()).collect()
}

fn assert_contiguous(sections: &[Section]) {
    let positions: Vec<usize> = sections.iter().map(|s| s.position).collect();
    let expected: Vec<usize> = (0..sections.len()).collect();
    assert_eq!(positions, expected);
}

#[tokio::test]
async fn test_move_to_top_renumbers() {
    let store = store();
    let (doc, sections) = paper(&store, &["Intro", "Method", "Results"]).await;

    let moved = store
        .move_section(&sections[1].id, MoveAction::Top)
        .await
        .unwrap();
    assert_eq!(titles(&moved), vec!["Method", "Intro", "Results"]);

    let stored = store.list(&doc).await.unwrap();
    assert_eq!(titles(&stored), vec!["Method", "Intro", "Results"]);
    let paths: Vec<&str> = stored.iter().map(|s| s.hierarchy_path.as_str()).collect();
    assert_eq!(paths, vec!["1", "2", "3"]);
    assert_contiguous(&stored);
}

#[tokio::test]
async fn test_create_at_position_shifts_following() {
    let store = store();
    let (doc, _) = paper(&store, &["Intro", "Method", "Results"]).await;

    let created = store
        .create(&doc, NewSection::titled("Background").at(1))
        .await
        .unwrap();
    assert_eq!(created.position, 1);
    assert_eq!(created.hierarchy_path, "2");

    let stored = store.list(&doc).await.unwrap();
    assert_eq!(titles(&stored), vec!["Intro", "Background", "Method", "Results"]);
    assert_contiguous(&stored);
}

#[tokio::test]
async fn test_move_down_then_up_restores_order() {
    let store = store();
    let (doc, sections) = paper(&store, &["A", "B", "C", "D"]).await;
    let before = store.list(&doc).await.unwrap();

    store.move_section(&sections[1].id, MoveAction::Down).await.unwrap();
    store.move_section(&sections[1].id, MoveAction::Up).await.unwrap();

    assert_eq!(store.list(&doc).await.unwrap(), before);
}

#[tokio::test]
async fn test_move_past_edges_is_noop() {
    let store = store();
    let (doc, sections) = paper(&store, &["A", "B", "C"]).await;

    let up = store.move_section(&sections[0].id, MoveAction::Up).await.unwrap();
    assert_eq!(titles(&up), vec!["A", "B", "C"]);
    let down = store
        .move_section(&sections[2].id, MoveAction::Down)
        .await
        .unwrap();
    assert_eq!(titles(&down), vec!["A", "B", "C"]);
    assert_contiguous(&store.list(&doc).await.unwrap());
}

#[tokio::test]
async fn test_move_to_position_out_of_range() {
    let store = store();
    let (doc, sections) = paper(&store, &["A", "B", "C"]).await;

    let err = store
        .move_section(&sections[0].id, MoveAction::ToPosition { new_position: 3 })
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::OutOfRange { position: 3, len: 3 }));
    assert_eq!(titles(&store.list(&doc).await.unwrap()), vec!["A", "B", "C"]);

    let moved = store
        .move_section(&sections[0].id, MoveAction::ToPosition { new_position: 2 })
        .await
        .unwrap();
    assert_eq!(titles(&moved), vec!["B", "C", "A"]);
}

#[tokio::test]
async fn test_structural_change_while_locked_is_rejected() {
    let store = store();
    let (doc, sections) = paper(&store, &["A", "B"]).await;

    let guard = store.lock_document(&doc).await.unwrap();
    let err = store
        .move_section(&sections[1].id, MoveAction::Top)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::ConcurrentModification { .. }));
    let err = store
        .create(&doc, NewSection::titled("C"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::ConcurrentModification { .. }));
    drop(guard);

    let moved = store
        .move_section(&sections[1].id, MoveAction::Top)
        .await
        .unwrap();
    assert_eq!(titles(&moved), vec!["B", "A"]);
}

#[tokio::test]
async fn test_history_records_previous_state() {
    let store = store();
    let (_, sections) = paper(&store, &["Intro"]).await;
    let id = &sections[0].id;

    store
        .update(id, SectionUpdate::content("first draft"))
        .await
        .unwrap();
    let updated = store
        .update(id, SectionUpdate::content("second draft with more words"))
        .await
        .unwrap();
    assert_eq!(updated.word_count, 5);

    let log = store.history(id).await.unwrap();
    let entries = log.collect().await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].content, "");
    assert_eq!(entries[1].content, "first draft");
    assert_eq!(entries[1].version, 2);

    let latest = log.latest().await.unwrap().unwrap();
    assert_eq!(latest.content, "first draft");

    // 相同内容不产生历史
    store
        .update(id, SectionUpdate::content("second draft with more words"))
        .await
        .unwrap();
    assert_eq!(log.len().await.unwrap(), 2);
}

#[tokio::test]
async fn test_concurrent_updates_each_leave_history() {
    let store = store();
    let (_, sections) = paper(&store, &["Intro"]).await;
    let id = sections[0].id.clone();

    let handles: Vec<_> = (0..5)
        .map(|i| {
            let store = store.clone();
            let id = id.clone();
            tokio::spawn(async move {
                store
                    .update(&id, SectionUpdate::content(format!("revision {i}")))
                    .await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let entries = store.history(&id).await.unwrap().collect().await.unwrap();
    assert_eq!(entries.len(), 5);
    let versions: Vec<u32> = entries.iter().map(|e| e.version).collect();
    assert_eq!(versions, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_delete_renumbers_and_drops_history() {
    let store = store();
    let (doc, sections) = paper(&store, &["A", "B", "C"]).await;
    store
        .update(&sections[1].id, SectionUpdate::content("text"))
        .await
        .unwrap();

    let remaining = store.delete(&sections[1].id).await.unwrap();
    assert_eq!(titles(&remaining), vec!["A", "C"]);
    assert_contiguous(&remaining);
    assert_eq!(remaining[1].hierarchy_path, "2");

    assert!(matches!(
        store.get(&sections[1].id).await,
        Err(StoreError::NotFound { .. })
    ));
    let orphaned = store.history_recorder().list(&sections[1].id);
    assert!(orphaned.is_empty().await.unwrap());
    assert_eq!(store.list(&doc).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_delete_document_cascades() {
    let store = store();
    let (doc, sections) = paper(&store, &["A", "B"]).await;

    store.delete_document(&doc).await.unwrap();
    assert!(matches!(
        store.get_document(&doc).await,
        Err(StoreError::NotFound { .. })
    ));
    assert!(matches!(
        store.get(&sections[0].id).await,
        Err(StoreError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_random_operations_keep_layout_consistent() {
    let store = store();
    let (doc, _) = paper(&store, &["A", "B", "C"]).await;
    let mut rng = StdRng::seed_from_u64(0x5c71be);

    for step in 0..200 {
        let current = store.list(&doc).await.unwrap();
        let len = current.len();
        match rng.gen_range(0..4) {
            0 => {
                let new = NewSection::titled(format!("S{step}"))
                    .with_level(rng.gen_range(1..=3))
                    .at(rng.gen_range(0..=len));
                store.create(&doc, new).await.unwrap();
            }
            1 if len > 1 => {
                let victim = &current[rng.gen_range(0..len)];
                store.delete(&victim.id).await.unwrap();
            }
            _ if len > 0 => {
                let section = &current[rng.gen_range(0..len)];
                let action = match rng.gen_range(0..5) {
                    0 => MoveAction::Up,
                    1 => MoveAction::Down,
                    2 => MoveAction::Top,
                    3 => MoveAction::Bottom,
                    _ => MoveAction::ToPosition {
                        new_position: rng.gen_range(0..len),
                    },
                };
                store.move_section(&section.id, action).await.unwrap();
            }
            _ => {}
        }

        let stored = store.list(&doc).await.unwrap();
        assert!(is_contiguous(&stored), "positions broken after step {step}");
        assert!(paths_consistent(&stored), "paths broken after step {step}");
    }
}

#[tokio::test]
async fn test_move_to_position_and_back_restores_order() {
    let store = store();
    let (doc, sections) = paper(&store, &["A", "B", "C", "D", "E"]).await;
    let original = store.list(&doc).await.unwrap();

    for (from, section) in sections.iter().enumerate() {
        for to in 0..sections.len() {
            store
                .move_section(&section.id, MoveAction::ToPosition { new_position: to })
                .await
                .unwrap();
            let moved = store.get(&section.id).await.unwrap();
            assert_eq!(moved.position, to);

            store
                .move_section(&section.id, MoveAction::ToPosition { new_position: from })
                .await
                .unwrap();
            assert_eq!(store.list(&doc).await.unwrap(), original, "{from} -> {to} -> {from}");
        }
    }
}

#[tokio::test]
async fn test_document_summaries_count_sections_and_words() {
    let store = store();
    let doc = store.create_document("Paper", None).await.unwrap();
    store
        .create(&doc.id, NewSection::titled("Intro").with_content("one two three"))
        .await
        .unwrap();
    store
        .create(&doc.id, NewSection::titled("Method").with_content("four five"))
        .await
        .unwrap();
    let empty = store.create_document("Empty", None).await.unwrap();

    let summaries = store.list_document_summaries().await.unwrap();
    assert_eq!(summaries.len(), 2);
    let paper = summaries.iter().find(|s| s.document.id == doc.id).unwrap();
    assert_eq!((paper.section_count, paper.total_words), (2, 5));
    let blank = summaries.iter().find(|s| s.document.id == empty.id).unwrap();
    assert_eq!((blank.section_count, blank.total_words), (0, 0));
}
