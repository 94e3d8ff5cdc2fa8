pub mod geocode_cache;
pub mod ingest_run;
pub mod job;
