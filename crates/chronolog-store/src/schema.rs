//! Relational schema bootstrap.

/// Idempotent schema DDL, applied at store open.
pub(crate) const SCHEMA: &str = "
create table if not exists feeds (
    id            text primary key,
    short_name    text not null unique,
    full_name     text not null,
    color         text not null default '000000',
    favicon       text,
    module        text not null,
    config        text,
    is_public     integer not null default 0,
    is_updating   integer not null default 1,
    is_searchable integer not null default 0
);

create table if not exists events (
    id         text primary key,
    feed_id    text not null references feeds (id),
    title      text,
    text       text,
    link       text,
    occurred   integer not null,
    raw        text,
    thumbnail  text,
    original   text,
    archived   text,
    is_related integer not null default 0
);

create index if not exists idx_events_occurred on events (occurred desc, id desc);
create index if not exists idx_events_feed on events (feed_id, occurred desc);
create index if not exists idx_events_link on events (link);

create table if not exists related_events (
    parent text not null references events (id),
    child  text not null references events (id),
    primary key (parent, child)
);
";
