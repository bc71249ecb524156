use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection as Connection, RunQueryDsl};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use super::schema::{link_tags, links};
use super::tag::{self, LinkTag, Tag};
use crate::utils::StoreError;

#[derive(
    Queryable, Selectable, Identifiable, Debug, Clone, PartialEq, Eq, Deserialize, Serialize,
)]
#[diesel(table_name = links)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Link {
    pub id: i32,
    pub user_id: i32,
    pub title: String,
    pub url: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: time::OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: time::OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub deleted_at: Option<time::OffsetDateTime>,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = links)]
pub struct NewLink {
    pub user_id: i32,
    pub title: String,
    pub url: String,
}

impl Link {
    pub async fn get(conn: &mut Connection, id: i32) -> Result<Option<Link>, StoreError> {
        Ok(links::table.find(id).first(conn).await.optional()?)
    }
}

pub async fn create_link(conn: &mut Connection, new_link: &NewLink) -> Result<Link, StoreError> {
    Ok(diesel::insert_into(links::table)
        .values(new_link)
        .returning(Link::as_returning())
        .get_result(conn)
        .await?)
}

/// Replaces the link's tag set with the given names, resolving them through
/// the tag store first. Runs as one transaction so the join table never
/// holds a half-rewritten set.
pub async fn set_link_tags(
    conn: &mut Connection,
    link: &Link,
    names: &[&str],
) -> Result<Vec<Tag>, StoreError> {
    let link_id = link.id;
    let user_id = link.user_id;

    conn.transaction::<_, StoreError, _>(|conn| {
        async move {
            let tags = tag::create_tags(conn, user_id, names).await?;

            diesel::delete(link_tags::table.filter(link_tags::link_id.eq(link_id)))
                .execute(conn)
                .await?;

            // duplicate names resolve to one row; dedup before hitting the
            // pair primary key
            let pairs = tags
                .iter()
                .map(|tag| LinkTag {
                    link_id,
                    tag_id: tag.id,
                })
                .unique_by(|pair| pair.tag_id)
                .collect::<Vec<_>>();
            diesel::insert_into(link_tags::table)
                .values(&pairs)
                .execute(conn)
                .await?;

            Ok(tags)
        }
        .scope_boxed()
    })
    .await
}

/// Tombstones links; their association pairs stay behind but stop showing
/// up in tag reads.
pub async fn delete_links(conn: &mut Connection, ids: Vec<i32>) -> Result<usize, StoreError> {
    use diesel::dsl::now;

    Ok(diesel::update(links::table)
        .filter(links::id.eq_any(ids).and(links::deleted_at.is_null()))
        .set((links::deleted_at.eq(now), links::updated_at.eq(now)))
        .execute(conn)
        .await?)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::super::connection;
    use super::*;
    use crate::utils::rand::{rand_str, rand_user_id};
    use tracing::info;

    pub fn rand_link(user_id: i32) -> NewLink {
        NewLink {
            user_id,
            title: rand_str(10),
            url: format!("https://{}.example", rand_str(10).to_lowercase()),
        }
    }

    pub async fn create_rand_link(conn: &mut Connection, user_id: i32) -> Link {
        create_link(conn, &rand_link(user_id))
            .await
            .expect("Error creating test link")
    }

    #[tokio::test]
    async fn create_and_fetch_link() {
        let mut conn = connection::establish().await;

        let m = create_rand_link(&mut conn, rand_user_id()).await;
        info!(?m, "created");
        assert!(m.id > 0);
        assert!(m.deleted_at.is_none());

        let got = Link::get(&mut conn, m.id).await.unwrap().unwrap();
        assert_eq!(got, m);
    }

    #[tokio::test]
    async fn replacing_tags_rewrites_the_pairs() {
        let mut conn = connection::establish().await;
        let user_id = rand_user_id();
        let link = create_rand_link(&mut conn, user_id).await;

        let first = set_link_tags(&mut conn, &link, &["reading", "rust"])
            .await
            .unwrap();
        assert_eq!(first.len(), 2);

        let replaced = set_link_tags(&mut conn, &link, &["rust", "later"])
            .await
            .unwrap();
        assert_eq!(replaced.len(), 2);

        let pairs: Vec<i32> = link_tags::table
            .filter(link_tags::link_id.eq(link.id))
            .select(link_tags::tag_id)
            .order(link_tags::tag_id.asc())
            .load(&mut conn)
            .await
            .unwrap();
        let mut expected = replaced.iter().map(|t| t.id).collect::<Vec<_>>();
        expected.sort_unstable();
        assert_eq!(pairs, expected);

        // the surviving tag kept its identity across the rewrite
        let rust_first = first.iter().find(|t| t.slug == "rust").unwrap();
        let rust_replaced = replaced.iter().find(|t| t.slug == "rust").unwrap();
        assert_eq!(rust_first.id, rust_replaced.id);
    }

    #[tokio::test]
    async fn duplicate_names_insert_one_pair() {
        let mut conn = connection::establish().await;
        let user_id = rand_user_id();
        let link = create_rand_link(&mut conn, user_id).await;

        let tags = set_link_tags(&mut conn, &link, &["Foo", "foo"]).await.unwrap();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].id, tags[1].id);

        let pairs: i64 = link_tags::table
            .filter(link_tags::link_id.eq(link.id))
            .count()
            .get_result(&mut conn)
            .await
            .unwrap();
        assert_eq!(pairs, 1);
    }

    #[tokio::test]
    async fn soft_deleted_links_keep_their_rows() {
        let mut conn = connection::establish().await;
        let link = create_rand_link(&mut conn, rand_user_id()).await;

        let count = delete_links(&mut conn, vec![link.id]).await.unwrap();
        assert_eq!(count, 1);

        let got = Link::get(&mut conn, link.id).await.unwrap().unwrap();
        assert!(got.deleted_at.is_some());

        // already tombstoned, nothing left to delete
        let count = delete_links(&mut conn, vec![link.id]).await.unwrap();
        assert_eq!(count, 0);
    }
}
