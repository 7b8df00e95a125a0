#[cfg(test)]
mod tests {
    use crate::dataset::types::{DatasetId, DatasetState, IndexSource};
    use crate::error::CommandError;
    use crate::persistence::source::load_records;
    use crate::persistence::store::{FileStore, MemoryStore, Persistence};
    use std::path::PathBuf;

    fn temp_root(name: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!("dataset-cluster-{}-{}", name, uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&root).unwrap();
        root
    }

    fn state(id: &str, records: &[&str]) -> DatasetState {
        DatasetState {
            dataset: DatasetId::new(id),
            records: records.iter().map(|r| r.to_string()).collect(),
            source: None,
            indexed_at: 1,
        }
    }

    // ============================================================
    // FILE STORE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_file_store_save_load_list() {
        let root = temp_root("store");
        let store = FileStore::new(&root);

        store.save(&state("beta", &["wrote compilers"])).await.unwrap();
        store.save(&state("alpha", &["build systems", "led a team of 5"])).await.unwrap();

        let loaded = store.load(&DatasetId::new("alpha")).await.unwrap().unwrap();
        assert_eq!(loaded.records, vec!["build systems", "led a team of 5"]);
        assert!(store.dir().join("alpha.json").exists());

        let ids = store.list().await.unwrap();
        assert_eq!(ids, vec![DatasetId::new("alpha"), DatasetId::new("beta")]);

        std::fs::remove_dir_all(root).ok();
    }

    #[tokio::test]
    async fn test_file_store_missing_dataset_is_none() {
        let root = temp_root("missing");
        let store = FileStore::new(&root);

        assert!(store.load(&DatasetId::new("never")).await.unwrap().is_none());
        assert!(store.list().await.unwrap().is_empty());

        std::fs::remove_dir_all(root).ok();
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_like_ids() {
        let root = temp_root("unsafe");
        let store = FileStore::new(&root);

        assert!(store.save(&state("../escape", &["x"])).await.is_err());
        assert!(store.load(&DatasetId::new(".hidden")).await.is_err());

        std::fs::remove_dir_all(root).ok();
    }

    // ============================================================
    // MEMORY STORE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_memory_store_failing_writes_keep_old_state() {
        let store = MemoryStore::new();
        store.save(&state("a", &["old"])).await.unwrap();

        store.set_fail_saves(true);
        assert!(store.save(&state("a", &["new"])).await.is_err());

        let loaded = store.load(&DatasetId::new("a")).await.unwrap().unwrap();
        assert_eq!(loaded.records, vec!["old"]);

        store.set_fail_saves(false);
        store.save(&state("a", &["new"])).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    // ============================================================
    // SOURCE LOADING TESTS
    // ============================================================

    #[tokio::test]
    async fn test_plain_text_source_skips_blank_lines() {
        let root = temp_root("text");
        let path = root.join("resume.txt");
        std::fs::write(&path, "build systems\n\n  led a team of 5  \n").unwrap();

        let records = load_records(&IndexSource::Path(path)).await.unwrap();
        assert_eq!(records, vec!["build systems", "led a team of 5"]);

        std::fs::remove_dir_all(root).ok();
    }

    #[tokio::test]
    async fn test_json_source_reads_string_array() {
        let root = temp_root("json");
        let path = root.join("records.json");
        std::fs::write(&path, r#"["wrote compilers", " ", "shipped a database"]"#).unwrap();

        let records = load_records(&IndexSource::Path(path)).await.unwrap();
        assert_eq!(records, vec!["wrote compilers", "shipped a database"]);

        std::fs::remove_dir_all(root).ok();
    }

    #[tokio::test]
    async fn test_missing_source_is_source_error() {
        let result = load_records(&IndexSource::Path(PathBuf::from("/definitely/not/here.txt"))).await;
        assert!(matches!(result, Err(CommandError::Source(_))));
    }

    #[tokio::test]
    async fn test_inline_records_are_trimmed() {
        let source = IndexSource::Records(vec![" a ".to_string(), "".to_string(), "b".to_string()]);
        assert_eq!(load_records(&source).await.unwrap(), vec!["a", "b"]);
    }
}
