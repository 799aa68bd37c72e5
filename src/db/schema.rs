use anyhow::Result;
use rusqlite::Connection;

pub fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

pub fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS users (
  id INTEGER PRIMARY KEY,
  username TEXT NOT NULL UNIQUE,
  created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS events (
  id INTEGER PRIMARY KEY,
  name TEXT NOT NULL,
  created_by_id INTEGER NOT NULL,
  created_at INTEGER NOT NULL,
  FOREIGN KEY(created_by_id) REFERENCES users(id)
);

CREATE TABLE IF NOT EXISTS event_participants (
  event_id INTEGER NOT NULL,
  user_id INTEGER NOT NULL,
  status TEXT NOT NULL DEFAULT 'pending',
  PRIMARY KEY(event_id, user_id),
  FOREIGN KEY(event_id) REFERENCES events(id) ON DELETE CASCADE,
  FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS media (
  id INTEGER PRIMARY KEY,
  event_id INTEGER,
  external_url TEXT NOT NULL,
  filename TEXT,
  uploaded_by_id INTEGER,
  face_count INTEGER NOT NULL DEFAULT 0,
  created_at INTEGER NOT NULL,
  FOREIGN KEY(event_id) REFERENCES events(id) ON DELETE CASCADE,
  FOREIGN KEY(uploaded_by_id) REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_media_event ON media(event_id);

CREATE TABLE IF NOT EXISTS face_clusters (
  id INTEGER PRIMARY KEY,
  event_id INTEGER,
  centroid_blob BLOB NOT NULL,
  label TEXT,
  user_id INTEGER,
  created_at INTEGER NOT NULL,
  updated_at INTEGER NOT NULL,
  FOREIGN KEY(event_id) REFERENCES events(id) ON DELETE CASCADE,
  FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_face_clusters_event ON face_clusters(event_id);

CREATE TABLE IF NOT EXISTS face_embeddings (
  id INTEGER PRIMARY KEY,
  media_id INTEGER NOT NULL,
  embedding_index INTEGER NOT NULL,
  embedding_blob BLOB NOT NULL,
  facial_area TEXT,
  status TEXT NOT NULL DEFAULT 'pending',
  cluster_id INTEGER,
  tag TEXT,
  created_at INTEGER NOT NULL,
  updated_at INTEGER NOT NULL,
  UNIQUE(media_id, embedding_index),
  FOREIGN KEY(media_id) REFERENCES media(id) ON DELETE CASCADE,
  FOREIGN KEY(cluster_id) REFERENCES face_clusters(id) ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_face_embeddings_media ON face_embeddings(media_id);
CREATE INDEX IF NOT EXISTS idx_face_embeddings_cluster ON face_embeddings(cluster_id);
CREATE INDEX IF NOT EXISTS idx_face_embeddings_status ON face_embeddings(status);

CREATE TABLE IF NOT EXISTS face_matches (
  id INTEGER PRIMARY KEY,
  event_id INTEGER NOT NULL,
  media_id INTEGER NOT NULL,
  embedding_index INTEGER NOT NULL,
  matched_user_id INTEGER,
  distance REAL,
  is_participant INTEGER NOT NULL DEFAULT 0,
  created_at INTEGER NOT NULL,
  updated_at INTEGER NOT NULL,
  UNIQUE(media_id, embedding_index),
  FOREIGN KEY(event_id) REFERENCES events(id) ON DELETE CASCADE,
  FOREIGN KEY(media_id) REFERENCES media(id) ON DELETE CASCADE,
  FOREIGN KEY(matched_user_id) REFERENCES users(id) ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_face_matches_event ON face_matches(event_id);
CREATE INDEX IF NOT EXISTS idx_face_matches_unmatched ON face_matches(event_id, matched_user_id);

CREATE TABLE IF NOT EXISTS reference_embeddings (
  id INTEGER PRIMARY KEY,
  user_id INTEGER NOT NULL,
  angle TEXT NOT NULL DEFAULT 'center',
  embedding_blob BLOB NOT NULL,
  status TEXT NOT NULL DEFAULT 'completed',
  created_at INTEGER NOT NULL,
  UNIQUE(user_id, angle),
  FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_reference_embeddings_user ON reference_embeddings(user_id);
    "#,
    )?;

    Ok(())
}
