mod aggregator;
mod collection;
mod counters;
mod error;
mod export;
mod file;
mod filter;
mod record;
mod remote;
mod store;

pub use aggregator::{Aggregator, GroupedTable, TimeUnit, Windows};
pub use collection::{SortDirection, TweetCollection};
pub use counters::{
    entity_counts, language_counts, token_counts, top_k, top_user_locations, unique_users,
    EntityCounts,
};
pub use error::{Result, TweetsetError};
pub use export::{dump_csv, dump_json_lines};
pub use file::{write_archive, FileCollection};
pub use filter::{merge_fragments, Filter};
pub use record::Record;
pub use remote::RemoteCollection;
pub use store::{DocumentStore, MemStore};

#[cfg(test)]
mod integration_tests {
    use super::*;

    use std::collections::BTreeMap;

    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::json;

    fn utc(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 3, 1, h, m, 0).unwrap()
    }

    fn tweet(id: i64, minute: u32, lang: &str, location: &str, text: &str) -> Record {
        let mut doc = json!({
            "id": id,
            "lang": lang,
            "text": text,
            "timestamp": format!("2015-03-01T10:{minute:02}:00Z"),
            "random_number": (id as f64) / 10.0,
            "user": {"id": id * 100, "location": location},
            "entities": {
                "hashtags": if text.contains('#') { json!([{"text": "tag"}]) } else { json!([]) },
                "user_mentions": [],
                "urls": [],
            },
        });
        if text.starts_with("RT ") {
            doc["retweeted_status"] = json!({"id": id * 1000});
        }
        Record::new(doc)
    }

    fn fixture() -> Vec<Record> {
        vec![
            tweet(1, 0, "en", "Kiev", "calm morning"),
            tweet(2, 5, "en", "Kiev", "RT penguins of antarctica"),
            tweet(3, 10, "fr", "Paris", "manchots"),
            tweet(4, 22, "en", "Odessa", "penguins again #birds"),
            tweet(5, 24, "en", "Kiev", "nothing here"),
            tweet(6, 41, "en", "Odessa", "last penguins sighting"),
        ]
    }

    fn seeded_store() -> MemStore {
        let store = MemStore::new();
        store.create_dataset("tweets", &["tweets_2015_02", "tweets_2015_03"]);
        let records = fixture();
        for record in &records[..2] {
            store.insert("tweets_2015_02", record.clone()).unwrap();
        }
        for record in &records[2..] {
            store.insert("tweets_2015_03", record.clone()).unwrap();
        }
        store
    }

    fn ids<C: TweetCollection>(collection: &C) -> Vec<i64> {
        collection
            .iter()
            .unwrap()
            .map(|r| r.unwrap().id().unwrap())
            .collect()
    }

    #[test]
    fn remote_pipeline_end_to_end() {
        let collection = RemoteCollection::connect(seeded_store(), "tweets").unwrap();
        let penguins = collection
            .clone()
            .language(&["en"])
            .containing(&["penguins"])
            .excluding_retweets();
        assert_eq!(ids(&penguins), vec![4, 6]);
        assert_eq!(penguins.count().unwrap(), 2);
        assert_eq!(
            penguins.texts().unwrap(),
            vec!["penguins again #birds", "last penguins sighting"]
        );

        // The base collection is still the unfiltered archive.
        assert_eq!(collection.count().unwrap(), 6);
    }

    #[test]
    fn file_and_remote_backends_agree() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tweets.msgpack");
        write_archive(&path, &fixture()).unwrap();

        let remote = RemoteCollection::connect(seeded_store(), "tweets")
            .unwrap()
            .language(&["en"])
            .since(utc(10, 5))
            .until(utc(10, 41));
        let file = FileCollection::open(&path)
            .unwrap()
            .language(&["en"])
            .since(utc(10, 5))
            .until(utc(10, 41));

        assert_eq!(ids(&remote), vec![4, 5]);
        assert_eq!(ids(&file), ids(&remote));
        assert_eq!(file.count().unwrap(), remote.count().unwrap());
    }

    #[test]
    fn minute_grid_counts_with_empty_windows() {
        let collection = RemoteCollection::connect(seeded_store(), "tweets").unwrap();
        let agg = Aggregator::new(TimeUnit::Minutes, 10).unwrap();
        assert_eq!(
            agg.counts(&collection).unwrap(),
            vec![
                (utc(10, 0), 2),
                (utc(10, 10), 1),
                (utc(10, 20), 2),
                (utc(10, 30), 0),
                (utc(10, 40), 1),
            ]
        );
    }

    #[test]
    fn grouped_language_table_over_the_store() {
        let collection = RemoteCollection::connect(seeded_store(), "tweets")
            .unwrap()
            .since(utc(9, 59))
            .until(utc(10, 45));
        let agg = Aggregator::new(TimeUnit::Minutes, 20).unwrap();
        let table = agg
            .grouped_result(&collection, |records| {
                let mut groups = BTreeMap::new();
                for record in records {
                    if let Some(lang) = record.lang() {
                        *groups.entry(lang.to_string()).or_insert(0) += 1;
                    }
                }
                groups
            })
            .unwrap();
        assert_eq!(table.columns(), &["en", "fr"]);
        assert_eq!(table.index(), &[utc(10, 0), utc(10, 20), utc(10, 40)]);
        assert_eq!(table.rows(), &[vec![2, 1], vec![2, 0], vec![1, 0]]);
    }

    #[test]
    fn counting_reductions_over_a_query() {
        let collection = RemoteCollection::connect(seeded_store(), "tweets").unwrap();
        let locations = top_user_locations(collection.iter().unwrap(), 2).unwrap();
        assert_eq!(
            locations,
            vec![(String::from("Kiev"), 3), (String::from("Odessa"), 2)]
        );

        let entities = entity_counts(collection.iter().unwrap()).unwrap();
        assert_eq!(entities.total, 6);
        assert_eq!(entities.retweet, 1);
        assert_eq!(entities.hashtag, 1);

        assert_eq!(unique_users(collection.iter().unwrap()).unwrap(), 6);
    }

    #[test]
    fn export_a_filtered_query_as_csv() {
        let collection = RemoteCollection::connect(seeded_store(), "tweets")
            .unwrap()
            .containing(&["penguins"]);
        let mut out = Vec::new();
        let rows = dump_csv(
            &mut out,
            collection.iter().unwrap(),
            &["id", "user.location", "text"],
        )
        .unwrap();
        assert_eq!(rows, 3);
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("id,user.location,text\n"));
        assert!(text.contains("2,Kiev,RT penguins of antarctica\n"));
    }
}
