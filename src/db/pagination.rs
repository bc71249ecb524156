use diesel::pg::Pg;
use diesel::query_builder::*;
use diesel::sql_types::BigInt;
use diesel::QueryResult;
use diesel_async::methods::LoadQuery;
use diesel_async::{AsyncPgConnection as Connection, RunQueryDsl};
use serde::Serialize;

const DEFAULT_PER_PAGE: i64 = 10;

/// Pagination metadata reported next to every page of rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Page {
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub pages: i64,
}

impl Page {
    pub fn new(total: i64, page: i64, limit: i64) -> Self {
        Self {
            total,
            page,
            limit,
            pages: (total + limit - 1) / limit,
        }
    }
}

pub trait Paginate: Sized {
    fn paginate(self, page: i64) -> Paginated<Self>;
}

impl<T> Paginate for T {
    fn paginate(self, page: i64) -> Paginated<Self> {
        // pages are 1-based; anything below that means the first page
        let page = page.max(1);
        Paginated {
            query: self,
            per_page: DEFAULT_PER_PAGE,
            page,
            offset: (page - 1) * DEFAULT_PER_PAGE,
        }
    }
}

#[derive(Debug, Clone, Copy, QueryId)]
pub struct Paginated<T> {
    query: T,
    page: i64,
    per_page: i64,
    offset: i64,
}

impl<T> Paginated<T> {
    pub fn per_page(self, per_page: i64) -> Self {
        Paginated {
            per_page,
            offset: (self.page - 1) * per_page,
            ..self
        }
    }

    /// Runs the wrapped query with `COUNT(*) OVER ()` piggybacked on every
    /// row, so a single round trip yields both the page and its totals.
    pub async fn load_and_count<'a, U>(self, conn: &mut Connection) -> QueryResult<(Vec<U>, Page)>
    where
        Self: LoadQuery<'a, Connection, (U, i64)> + 'a,
        U: Send,
        T: 'a,
    {
        let (page, per_page) = (self.page, self.per_page);
        let results = self.load::<(U, i64)>(conn).await?;
        let total = results.get(0).map(|&(_, total)| total).unwrap_or(0);
        let records = results.into_iter().map(|(record, _)| record).collect();
        Ok((records, Page::new(total, page, per_page)))
    }
}

impl<T: Query> Query for Paginated<T> {
    type SqlType = (T::SqlType, BigInt);
}

impl<T> QueryFragment<Pg> for Paginated<T>
where
    T: QueryFragment<Pg>,
{
    fn walk_ast<'b>(&'b self, mut out: AstPass<'_, 'b, Pg>) -> QueryResult<()> {
        out.push_sql("SELECT *, COUNT(*) OVER () FROM (");
        self.query.walk_ast(out.reborrow())?;
        out.push_sql(") t LIMIT ");
        out.push_bind_param::<BigInt, _>(&self.per_page)?;
        out.push_sql(" OFFSET ");
        out.push_bind_param::<BigInt, _>(&self.offset)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_metadata_math() {
        let page = Page::new(5, 1, 2);
        assert_eq!(page.pages, 3);
        assert_eq!(Page::new(0, 1, 2).pages, 0);
        assert_eq!(Page::new(4, 2, 2).pages, 2);
        assert_eq!(Page::new(6, 3, 2).pages, 3);
    }

    #[test]
    fn paginate_clamps_page() {
        let q = ().paginate(0).per_page(5);
        assert_eq!(q.page, 1);
        assert_eq!(q.offset, 0);

        let q = ().paginate(3).per_page(5);
        assert_eq!(q.offset, 10);
    }
}
