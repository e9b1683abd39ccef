use super::*;
use anyhow::Result;
use std::collections::HashSet;
use tempfile::TempDir;

async fn create_test_database() -> Result<(TempDir, Database)> {
    let temp_dir = TempDir::new()?;
    let database = Database::initialize_from_config_dir(temp_dir.path()).await?;
    Ok((temp_dir, database))
}

#[tokio::test]
async fn integration_schema_migration() -> Result<()> {
    let (temp_dir, database) = create_test_database().await?;

    assert!(temp_dir.path().join("metadata.db").exists());

    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' \
         AND name NOT LIKE '_sqlx_%'",
    )
    .fetch_all(database.pool())
    .await?;

    let expected_tables: HashSet<&'static str> = ["knowledge_bases", "notes", "chunk_records"]
        .into_iter()
        .collect();

    let actual_tables: HashSet<&str> = tables.iter().map(|t| t.as_str()).collect();
    assert_eq!(actual_tables, expected_tables);

    Ok(())
}

#[tokio::test]
async fn integration_foreign_key_constraints() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;

    let orphan = database
        .create_note(NewNote {
            knowledge_base_id: 404,
            title: "Orphan".to_string(),
            content: "no owner".to_string(),
        })
        .await;

    assert!(orphan.is_err());
    Ok(())
}

#[tokio::test]
async fn integration_reopen_keeps_data() -> Result<()> {
    let temp_dir = TempDir::new()?;

    let kb_id = {
        let database = Database::initialize_from_config_dir(temp_dir.path()).await?;
        let kb = database
            .create_knowledge_base(NewKnowledgeBase {
                user_id: 1,
                title: "Persistent".to_string(),
                description: String::new(),
            })
            .await?;
        database.pool().close().await;
        kb.id
    };

    let reopened = Database::initialize_from_config_dir(temp_dir.path()).await?;
    let kb = reopened.get_knowledge_base(kb_id).await?;
    assert_eq!(kb.map(|kb| kb.title), Some("Persistent".to_string()));

    Ok(())
}

#[tokio::test]
async fn integration_note_lifecycle_through_database() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;

    let kb = database
        .create_knowledge_base(NewKnowledgeBase {
            user_id: 3,
            title: "Garden".to_string(),
            description: "Plants".to_string(),
        })
        .await?;
    let note = database
        .create_note(NewNote {
            knowledge_base_id: kb.id,
            title: "Tomatoes".to_string(),
            content: "Water daily".to_string(),
        })
        .await?;

    let ids = database
        .insert_chunk_records(&[NewChunkRecord {
            note_id: note.id,
            knowledge_base_id: kb.id,
            chunk_index: 0,
            chunk_content: "Water daily".to_string(),
            embedding: vec![0.1, 0.2],
        }])
        .await?;

    assert_eq!(database.chunk_ids_for_knowledge_base(kb.id).await?, vec![(ids[0], note.id)]);
    assert_eq!(database.get_chunks_for_knowledge_base(kb.id).await?.len(), 1);
    assert!(database.latest_chunk_update_time(note.id).await?.is_some());

    database.delete_note(note.id).await?;
    // chunk records outlive the note until the next sync
    assert_eq!(database.count_chunks_for_knowledge_base(kb.id).await?, 1);
    assert_eq!(database.delete_chunks_for_note(note.id).await?, 1);

    let kb = database.get_knowledge_base(kb.id).await?;
    assert_eq!(kb.map(|kb| kb.note_count), Some(0));

    Ok(())
}
