use diesel::prelude::*;
use diesel::upsert::DecoratableTarget;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection as Connection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use slug::slugify;
use tracing::debug;

use super::link::Link;
use super::pagination::{Page, Paginate};
use super::schema::{link_tags, links, tags};
use crate::utils::StoreError;

/// A user-owned label. The `(user_id, slug)` pair is unique among rows
/// without a tombstone; `name` keeps whatever spelling first created it.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone, Deserialize, Serialize)]
#[diesel(table_name = tags)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Tag {
    pub id: i32,
    pub user_id: i32,
    pub slug: String,
    pub name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: time::OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: time::OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub deleted_at: Option<time::OffsetDateTime>,
}

#[derive(Insertable, Identifiable, Selectable, Queryable, Associations, Debug)]
#[diesel(belongs_to(Link))]
#[diesel(belongs_to(Tag))]
#[diesel(table_name = link_tags)]
#[diesel(primary_key(link_id, tag_id))]
pub struct LinkTag {
    pub link_id: i32,
    pub tag_id: i32,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = tags)]
pub struct NewTag<'a> {
    pub user_id: i32,
    pub slug: &'a str,
    pub name: &'a str,
}

// Losing the insert race twice for the same slug means something is
// rewriting the row faster than we can read it back.
const UPSERT_RETRIES: usize = 3;

async fn find_tag(
    conn: &mut Connection,
    user_id: i32,
    slug: &str,
) -> Result<Option<Tag>, StoreError> {
    Ok(tags::table
        .filter(tags::user_id.eq(user_id))
        .filter(tags::slug.eq(slug))
        .filter(tags::deleted_at.is_null())
        .select(Tag::as_select())
        .first(conn)
        .await
        .optional()?)
}

async fn get_or_create_tag(
    conn: &mut Connection,
    user_id: i32,
    name: &str,
) -> Result<Tag, StoreError> {
    let slug = slugify(name);
    for _ in 0..UPSERT_RETRIES {
        if let Some(tag) = find_tag(conn, user_id, &slug).await? {
            return Ok(tag);
        }
        let inserted = diesel::insert_into(tags::table)
            .values(&NewTag {
                user_id,
                slug: &slug,
                name,
            })
            .on_conflict((tags::user_id, tags::slug))
            .filter_target(tags::deleted_at.is_null())
            .do_nothing()
            .returning(Tag::as_returning())
            .get_result(conn)
            .await
            .optional()?;
        match inserted {
            Some(tag) => return Ok(tag),
            // a concurrent transaction owns the slug now; adopt its row
            None => debug!(user_id, %slug, "tag insert lost a conflict race"),
        }
    }
    Err(StoreError::ConflictRetryExhausted { slug })
}

/// Resolves every name to a persisted tag, inserting the missing ones, all
/// inside one transaction. The result keeps the input order; duplicate
/// names within the batch resolve to the same row, and existing rows are
/// returned untouched.
pub async fn create_tags(
    conn: &mut Connection,
    user_id: i32,
    names: &[&str],
) -> Result<Vec<Tag>, StoreError> {
    if names.iter().any(|name| name.trim().is_empty()) {
        return Err(StoreError::EmptyTagName);
    }

    conn.transaction::<_, StoreError, _>(|conn| {
        async move {
            let mut tags = Vec::with_capacity(names.len());
            for name in names {
                tags.push(get_or_create_tag(conn, user_id, name).await?);
            }
            Ok(tags)
        }
        .scope_boxed()
    })
    .await
}

pub async fn get_tag(conn: &mut Connection, user_id: i32, slug: &str) -> Result<Tag, StoreError> {
    find_tag(conn, user_id, slug)
        .await?
        .ok_or_else(|| StoreError::TagNotFound {
            slug: slug.to_string(),
        })
}

pub async fn get_tags(conn: &mut Connection, user_id: i32) -> Result<Vec<Tag>, StoreError> {
    Ok(tags::table
        .filter(tags::user_id.eq(user_id))
        .filter(tags::deleted_at.is_null())
        .select(Tag::as_select())
        .order(tags::id.asc())
        .load(conn)
        .await?)
}

impl Tag {
    /// Number of live links carrying this tag, counted at call time.
    pub async fn count_links(&self, conn: &mut Connection) -> Result<i64, StoreError> {
        Ok(link_tags::table
            .inner_join(links::table)
            .filter(link_tags::tag_id.eq(self.id))
            .filter(links::deleted_at.is_null())
            .count()
            .get_result(conn)
            .await?)
    }

    /// One page of the links carrying this tag, newest first, each with its
    /// full tag set. A page past the end yields no rows but true totals.
    pub async fn links(
        &self,
        conn: &mut Connection,
        page: i64,
        limit: i64,
    ) -> Result<(Vec<(Link, Vec<Tag>)>, Page), StoreError> {
        if limit <= 0 {
            return Err(StoreError::InvalidLimit { limit });
        }

        let (links, meta) = links::table
            .inner_join(link_tags::table)
            .filter(link_tags::tag_id.eq(self.id))
            .filter(links::deleted_at.is_null())
            .select(Link::as_select())
            .order(links::id.desc())
            .paginate(page)
            .per_page(limit)
            .load_and_count::<Link>(conn)
            .await?;

        if links.is_empty() {
            // no rows, no window count; recount so the metadata still
            // reports the real totals
            let meta = Page::new(self.count_links(conn).await?, meta.page, limit);
            return Ok((vec![], meta));
        }

        Ok((get_tags_per_link(conn, links).await?, meta))
    }
}

pub async fn get_tags_per_link(
    conn: &mut Connection,
    links: Vec<Link>,
) -> Result<Vec<(Link, Vec<Tag>)>, StoreError> {
    let tags = LinkTag::belonging_to(&links)
        .inner_join(tags::table)
        .filter(tags::deleted_at.is_null())
        .select((LinkTag::as_select(), Tag::as_select()))
        .order((link_tags::dsl::link_id.desc(), tags::dsl::slug.asc()))
        .load(conn)
        .await?;
    Ok(tags
        .grouped_by(&links)
        .into_iter()
        .zip(links)
        .map(|(tags, link)| (link, tags.into_iter().map(|(_, tag)| tag).collect()))
        .collect())
}
