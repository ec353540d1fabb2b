use std::collections::BTreeMap;

use chrono::{TimeZone, Utc};
use serde_json::json;
use tweetset::{
    dump_csv, top_user_locations, write_archive, Aggregator, FileCollection, MemStore, Record,
    RemoteCollection, Result, TimeUnit, TweetCollection,
};

const LOCATIONS: [&str; 4] = ["Kiev", "Odessa", "Lviv", "Kharkiv"];
const LANGUAGES: [&str; 3] = ["en", "uk", "ru"];

fn synthetic_tweet(id: i64) -> Record {
    let minute = (id * 7) % 180;
    let text = if id % 5 == 0 {
        format!("RT penguins spotted near the harbor, tweet {id}")
    } else {
        format!("ordinary city chatter, tweet {id}")
    };
    let mut doc = json!({
        "id": id,
        "lang": LANGUAGES[(id % 3) as usize],
        "text": text,
        "timestamp": format!("2015-03-01T{:02}:{:02}:00Z", 10 + minute / 60, minute % 60),
        "random_number": (id % 100) as f64 / 100.0,
        "user": {
            "id": 1000 + id % 40,
            "location": LOCATIONS[(id % 4) as usize],
        },
        "entities": {"hashtags": [], "user_mentions": [], "urls": []},
    });
    if id % 5 == 0 {
        doc["retweeted_status"] = json!({"id": id * 1000});
    }
    Record::new(doc)
}

fn seed_store() -> Result<MemStore> {
    let store = MemStore::new();
    store.create_dataset("city", &["city_a", "city_b"]);
    for id in 0..60 {
        let partition = if id < 30 { "city_a" } else { "city_b" };
        store.insert(partition, synthetic_tweet(id))?;
    }
    Ok(store)
}

fn query_example(collection: &RemoteCollection<MemStore>) -> Result<()> {
    let penguins = collection
        .clone()
        .language(&["en"])
        .containing(&["penguins"]);
    println!("english penguin tweets: {}", penguins.count()?);
    for text in penguins.texts()? {
        println!("  {text}");
    }

    let originals = collection
        .clone()
        .excluding_retweets()
        .since(Utc.with_ymd_and_hms(2015, 3, 1, 10, 30, 0).unwrap());
    println!("original tweets after 10:30: {}", originals.count()?);

    let locations = top_user_locations(collection.iter()?, 3)?;
    println!("top locations: {locations:?}");

    Ok(())
}

fn aggregation_example(collection: &RemoteCollection<MemStore>) -> Result<()> {
    let agg = Aggregator::new(TimeUnit::Hours, 1)?;
    let table = agg.grouped_result(collection, |records| {
        let mut groups = BTreeMap::new();
        for record in records {
            if let Some(lang) = record.lang() {
                *groups.entry(lang.to_string()).or_insert(0) += 1;
            }
        }
        groups
    })?;
    println!("hourly language counts {:?}", table.columns());
    for (start, row) in table.index().iter().zip(table.rows()) {
        println!("  {start} {row:?}");
    }
    Ok(())
}

fn archive_example(collection: &RemoteCollection<MemStore>) -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("city.msgpack");
    let records = collection.iter()?.collect::<Result<Vec<_>>>()?;
    write_archive(&path, &records)?;

    let archive = FileCollection::open(&path)?.language(&["uk"]);
    println!("ukrainian tweets in the archive: {}", archive.count()?);

    let mut csv = Vec::new();
    dump_csv(
        &mut csv,
        archive.limit(5).iter()?,
        &["id", "user.location", "text"],
    )?;
    println!("{}", String::from_utf8_lossy(&csv));
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = seed_store()?;
    let collection = RemoteCollection::connect(store, "city")?;
    query_example(&collection)?;
    aggregation_example(&collection)?;
    archive_example(&collection)?;

    Ok(())
}
