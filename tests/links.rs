mod common;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use shortener::{
    db::SqliteStore,
    error::ServiceError,
    links::{ClickContext, LinkService, MAX_GENERATION_ATTEMPTS},
    models::{Link, NewLink},
    repository::{LinkRepository, RepoResult},
};

use common::{services, CODE_LENGTH};

fn click(ip: &str, ua: &str, referer: Option<&str>, country: Option<&str>) -> ClickContext {
    ClickContext {
        ip_address: Some(ip.to_owned()),
        user_agent: Some(ua.to_owned()),
        referer: referer.map(str::to_owned),
        country: country.map(str::to_owned),
        city: None,
    }
}

fn is_generated_code(code: &str) -> bool {
    code.len() == CODE_LENGTH && code.chars().all(|c| c.is_ascii_alphanumeric())
}

#[tokio::test]
async fn create_lookup_click_and_stats() {
    let s = services().await;
    let (owner, _) = s.users.register("owner@example.com", "abcdefg1").await.unwrap();

    let link = s
        .links
        .create_link("https://example.com", Some(owner.id), None, None)
        .await
        .unwrap();
    assert!(is_generated_code(&link.short_code), "{}", link.short_code);
    assert_eq!(link.click_count, 0);
    assert_eq!(link.created_at, link.updated_at);

    let found = s.links.get_link_by_short_code(&link.short_code).await.unwrap();
    assert_eq!(found.original_url, "https://example.com");

    for _ in 0..3 {
        s.links
            .record_click(&link.short_code, ClickContext::default())
            .await
            .unwrap();
    }

    let now = Utc::now();
    let stats = s
        .links
        .get_link_stats(link.id, owner.id, now - Duration::days(1), now + Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(stats.link_id, link.id);
    assert_eq!(stats.total_clicks, 3);

    let reloaded = s.links.get_link(link.id, owner.id).await.unwrap();
    assert_eq!(reloaded.click_count, 3);
}

#[tokio::test]
async fn url_without_scheme_is_normalised() {
    let s = services().await;
    let link = s.links.create_link("example.com/path", None, None, None).await.unwrap();
    assert_eq!(link.original_url, "http://example.com/path");
}

#[tokio::test]
async fn invalid_urls_are_rejected() {
    let s = services().await;
    for url in ["", "   ", "http://", "http://exa mple.com", "http://a..b.com"] {
        assert!(
            matches!(
                s.links.create_link(url, None, None, None).await,
                Err(ServiceError::InvalidUrl)
            ),
            "{url:?}"
        );
    }
}

#[tokio::test]
async fn custom_code_is_used_verbatim_and_must_be_free() {
    let s = services().await;

    let link = s
        .links
        .create_link("https://example.com", None, Some("my-Code_1"), None)
        .await
        .unwrap();
    assert_eq!(link.short_code, "my-Code_1");

    let err = s
        .links
        .create_link("https://other.example", None, Some("my-Code_1"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ShortCodeExists));

    // No second row was written.
    let still = s.links.get_link_by_short_code("my-Code_1").await.unwrap();
    assert_eq!(still.id, link.id);
    assert_eq!(still.original_url, "https://example.com");
}

#[tokio::test]
async fn expiry_in_the_past_is_rejected() {
    let s = services().await;
    let (owner, _) = s.users.register("owner@example.com", "abcdefg1").await.unwrap();

    let err = s
        .links
        .create_link(
            "https://example.com",
            Some(owner.id),
            None,
            Some(Utc::now() - Duration::hours(1)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ExpirationInPast));

    let link = s
        .links
        .create_link("https://example.com", Some(owner.id), None, None)
        .await
        .unwrap();
    let err = s
        .links
        .update_link(link.id, owner.id, Some(Utc::now() - Duration::minutes(5)))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ExpirationInPast));
}

#[tokio::test]
async fn update_sets_and_clears_expiry() {
    let s = services().await;
    let (owner, _) = s.users.register("owner@example.com", "abcdefg1").await.unwrap();
    let link = s
        .links
        .create_link("https://example.com", Some(owner.id), None, None)
        .await
        .unwrap();

    let expiry = Utc::now() + Duration::days(7);
    let updated = s.links.update_link(link.id, owner.id, Some(expiry)).await.unwrap();
    assert_eq!(updated.expires_at, Some(expiry));
    assert!(updated.updated_at >= link.updated_at);

    let cleared = s.links.update_link(link.id, owner.id, None).await.unwrap();
    assert_eq!(cleared.expires_at, None);
}

#[tokio::test]
async fn lookups_do_not_touch_the_counter() {
    let s = services().await;
    let link = s.links.create_link("https://example.com", None, None, None).await.unwrap();

    let first = s.links.get_link_by_short_code(&link.short_code).await.unwrap();
    let second = s.links.get_link_by_short_code(&link.short_code).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(second.click_count, 0);
}

#[tokio::test]
async fn unknown_and_expired_codes() {
    let s = services().await;
    assert!(matches!(
        s.links.get_link_by_short_code("nope").await,
        Err(ServiceError::LinkNotFound)
    ));

    let now = Utc::now();
    LinkRepository::create(
        s.store.as_ref(),
        NewLink {
            short_code: "gone".to_owned(),
            original_url: "https://example.com".to_owned(),
            user_id: None,
            expires_at: Some(now - Duration::seconds(1)),
            created_at: now - Duration::days(1),
        },
    )
    .await
    .unwrap();

    assert!(matches!(
        s.links.get_link_by_short_code("gone").await,
        Err(ServiceError::LinkExpired)
    ));
    assert!(matches!(
        s.links.record_click("gone", ClickContext::default()).await,
        Err(ServiceError::LinkExpired)
    ));
}

#[tokio::test]
async fn concurrent_clicks_are_all_counted() {
    const CLICKS: i64 = 25;

    let s = services().await;
    let link = s.links.create_link("https://example.com", None, None, None).await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..CLICKS {
        let links = s.links.clone();
        let code = link.short_code.clone();
        tasks.push(tokio::spawn(async move {
            links
                .record_click(&code, click(&format!("10.0.0.{i}"), "agent", None, None))
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let reloaded = s.links.get_link_by_short_code(&link.short_code).await.unwrap();
    assert_eq!(reloaded.click_count, CLICKS);
}

#[tokio::test]
async fn record_click_returns_the_advanced_count() {
    let s = services().await;
    let link = s.links.create_link("https://example.com", None, None, None).await.unwrap();

    let first = s.links.record_click(&link.short_code, ClickContext::default()).await.unwrap();
    assert_eq!(first.click_count, 1);
    let second = s.links.record_click(&link.short_code, ClickContext::default()).await.unwrap();
    assert_eq!(second.click_count, 2);
}

#[tokio::test]
async fn non_owners_are_refused() {
    let s = services().await;
    let (a, _) = s.users.register("a@example.com", "abcdefg1").await.unwrap();
    let (b, _) = s.users.register("b@example.com", "abcdefg1").await.unwrap();

    let owned = s
        .links
        .create_link("https://example.com", Some(a.id), None, None)
        .await
        .unwrap();
    let ownerless = s.links.create_link("https://example.com", None, None, None).await.unwrap();

    let now = Utc::now();
    for (id, requester) in [(owned.id, b.id), (ownerless.id, a.id)] {
        assert!(matches!(
            s.links.get_link(id, requester).await,
            Err(ServiceError::Unauthorized)
        ));
        assert!(matches!(
            s.links.update_link(id, requester, None).await,
            Err(ServiceError::Unauthorized)
        ));
        assert!(matches!(
            s.links.delete_link(id, requester).await,
            Err(ServiceError::Unauthorized)
        ));
        assert!(matches!(
            s.links.get_link_stats(id, requester, now - Duration::days(1), now).await,
            Err(ServiceError::Unauthorized)
        ));
    }
}

#[tokio::test]
async fn owner_deletes_and_link_is_gone_for_everyone() {
    let s = services().await;
    let (a, _) = s.users.register("a@example.com", "abcdefg1").await.unwrap();
    let (b, _) = s.users.register("b@example.com", "abcdefg1").await.unwrap();
    let link = s
        .links
        .create_link("https://example.com", Some(a.id), None, None)
        .await
        .unwrap();
    s.links.record_click(&link.short_code, ClickContext::default()).await.unwrap();

    assert!(matches!(
        s.links.delete_link(link.id, b.id).await,
        Err(ServiceError::Unauthorized)
    ));
    s.links.delete_link(link.id, a.id).await.unwrap();

    for requester in [a.id, b.id] {
        assert!(matches!(
            s.links.get_link(link.id, requester).await,
            Err(ServiceError::LinkNotFound)
        ));
    }
    assert!(matches!(
        s.links.get_link_by_short_code(&link.short_code).await,
        Err(ServiceError::LinkNotFound)
    ));
}

#[tokio::test]
async fn stats_break_down_clicks() {
    let s = services().await;
    let (owner, _) = s.users.register("owner@example.com", "abcdefg1").await.unwrap();
    let link = s
        .links
        .create_link("https://example.com", Some(owner.id), None, None)
        .await
        .unwrap();
    let code = &link.short_code;

    let visits = [
        click("1.1.1.1", "Phone Mobile Safari", Some("https://news.example"), Some("DE")),
        click("1.1.1.1", "Some Tablet Browser", Some("https://news.example"), Some("DE")),
        click("2.2.2.2", "Desktop Browser", None, None),
        click("3.3.3.3", "Desktop Browser", Some("https://blog.example"), Some("FR")),
    ];
    for visit in visits {
        s.links.record_click(code, visit).await.unwrap();
    }

    let now = Utc::now();
    let stats = s
        .links
        .get_link_stats(link.id, owner.id, now - Duration::days(1), now + Duration::minutes(1))
        .await
        .unwrap();

    assert_eq!(stats.total_clicks, 4);
    assert_eq!(stats.unique_clicks, 3);

    let today = now.format("%Y-%m-%d").to_string();
    assert_eq!(stats.clicks_by_date.get(&today), Some(&4));

    let countries: Vec<(&str, i64)> = stats
        .clicks_by_country
        .iter()
        .map(|c| (c.name.as_str(), c.count))
        .collect();
    assert_eq!(countries, vec![("DE", 2), ("FR", 1), ("Unknown", 1)]);

    assert_eq!(stats.clicks_by_device.get("Mobile"), Some(&1));
    assert_eq!(stats.clicks_by_device.get("Tablet"), Some(&1));
    assert_eq!(stats.clicks_by_device.get("Desktop"), Some(&2));

    let referers: Vec<(&str, i64)> = stats
        .top_referers
        .iter()
        .map(|r| (r.name.as_str(), r.count))
        .collect();
    assert_eq!(
        referers,
        vec![
            ("https://news.example", 2),
            ("Direct", 1),
            ("https://blog.example", 1)
        ]
    );
}

#[tokio::test]
async fn stats_respect_the_time_window() {
    let s = services().await;
    let (owner, _) = s.users.register("owner@example.com", "abcdefg1").await.unwrap();
    let link = s
        .links
        .create_link("https://example.com", Some(owner.id), None, None)
        .await
        .unwrap();
    s.links.record_click(&link.short_code, ClickContext::default()).await.unwrap();

    let now = Utc::now();
    let stats = s
        .links
        .get_link_stats(link.id, owner.id, now - Duration::days(30), now - Duration::days(1))
        .await
        .unwrap();
    assert_eq!(stats.total_clicks, 0);
    assert_eq!(stats.unique_clicks, 0);
    assert!(stats.clicks_by_date.is_empty());
    assert!(stats.clicks_by_country.is_empty());
    assert!(stats.top_referers.is_empty());
}

#[tokio::test]
async fn listing_is_per_owner_newest_first_and_paged() {
    let s = services().await;
    let (a, _) = s.users.register("a@example.com", "abcdefg1").await.unwrap();
    let (b, _) = s.users.register("b@example.com", "abcdefg1").await.unwrap();

    let mut created = Vec::new();
    for i in 0..5 {
        let link = s
            .links
            .create_link(&format!("https://example.com/{i}"), Some(a.id), None, None)
            .await
            .unwrap();
        created.push(link.id);
    }
    s.links
        .create_link("https://example.com/b", Some(b.id), None, None)
        .await
        .unwrap();

    let first = s.links.list_user_links(a.id, 1, 2).await.unwrap();
    let second = s.links.list_user_links(a.id, 2, 2).await.unwrap();
    let third = s.links.list_user_links(a.id, 3, 2).await.unwrap();

    let ids: Vec<i64> = first.iter().chain(&second).chain(&third).map(|l| l.id).collect();
    created.reverse();
    assert_eq!(ids, created);
    assert_eq!(third.len(), 1);

    assert_eq!(s.links.list_user_links(b.id, 1, 20).await.unwrap().len(), 1);
}

#[tokio::test]
async fn generation_gives_up_when_the_code_space_is_full() {
    let s = services().await;
    let tiny = LinkService::new(s.store.clone(), s.store.clone(), 1);

    for c in ('a'..='z').chain('A'..='Z').chain('0'..='9') {
        tiny.create_link("https://example.com", None, Some(&c.to_string()), None)
            .await
            .unwrap();
    }

    let err = tiny
        .create_link("https://example.com", None, None, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::CodeSpaceExhausted(MAX_GENERATION_ATTEMPTS)
    ));
}

#[tokio::test]
async fn purge_removes_only_links_expired_before_cutoff() {
    let s = services().await;
    let now = Utc::now();

    for (code, expires_at) in [
        ("old", Some(now - Duration::days(3))),
        ("recent", Some(now - Duration::minutes(10))),
        ("future", Some(now + Duration::days(1))),
        ("forever", None),
    ] {
        LinkRepository::create(
            s.store.as_ref(),
            NewLink {
                short_code: code.to_owned(),
                original_url: "https://example.com".to_owned(),
                user_id: None,
                expires_at,
                created_at: now - Duration::days(5),
            },
        )
        .await
        .unwrap();
    }

    let removed = s.links.purge_expired(now - Duration::days(1)).await.unwrap();
    assert_eq!(removed, 1);

    assert!(!s.store.exists_by_short_code("old").await.unwrap());
    for code in ["recent", "future", "forever"] {
        assert!(s.store.exists_by_short_code(code).await.unwrap(), "{code}");
    }
}

/// Store whose existence check never sees a code, so only the UNIQUE
/// constraint can catch a duplicate.
struct BlindExists(Arc<SqliteStore>);

#[async_trait]
impl LinkRepository for BlindExists {
    async fn create(&self, link: NewLink) -> RepoResult<Link> {
        LinkRepository::create(self.0.as_ref(), link).await
    }

    async fn get_by_id(&self, id: i64) -> RepoResult<Option<Link>> {
        LinkRepository::get_by_id(self.0.as_ref(), id).await
    }

    async fn get_by_short_code(&self, short_code: &str) -> RepoResult<Option<Link>> {
        self.0.get_by_short_code(short_code).await
    }

    async fn exists_by_short_code(&self, _short_code: &str) -> RepoResult<bool> {
        Ok(false)
    }

    async fn list_by_user(&self, user_id: i64, offset: i64, limit: i64) -> RepoResult<Vec<Link>> {
        self.0.list_by_user(user_id, offset, limit).await
    }

    async fn update_expiration(
        &self,
        id: i64,
        expires_at: Option<DateTime<Utc>>,
        updated_at: DateTime<Utc>,
    ) -> RepoResult<Option<Link>> {
        self.0.update_expiration(id, expires_at, updated_at).await
    }

    async fn delete(&self, id: i64) -> RepoResult<bool> {
        LinkRepository::delete(self.0.as_ref(), id).await
    }

    async fn delete_expired(&self, before: DateTime<Utc>) -> RepoResult<u64> {
        self.0.delete_expired(before).await
    }
}

#[tokio::test]
async fn unique_constraint_reports_taken_custom_code() {
    let s = services().await;
    let first = s
        .links
        .create_link("https://example.com/first", None, Some("taken"), None)
        .await
        .unwrap();

    let blind = LinkService::new(
        Arc::new(BlindExists(s.store.clone())),
        s.store.clone(),
        CODE_LENGTH,
    );
    let err = blind
        .create_link("https://example.com/second", None, Some("taken"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ShortCodeExists), "{err:?}");

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM links WHERE short_code = 'taken'")
        .fetch_one(s.store.pool())
        .await
        .unwrap();
    assert_eq!(rows, 1);
    let stored = s.links.get_link_by_short_code("taken").await.unwrap();
    assert_eq!(stored, first);
}

#[tokio::test]
async fn stats_keep_top_ten_countries_and_top_five_referers() {
    let s = services().await;
    let (owner, _) = s.users.register("owner@example.com", "abcdefg1").await.unwrap();
    let link = s
        .links
        .create_link("https://example.com", Some(owner.id), None, None)
        .await
        .unwrap();

    // Bucket i gets i + 1 clicks; only the first seven carry a referer.
    for i in 0..12 {
        let country = format!("K{i:02}");
        let referer = (i < 7).then(|| format!("https://r{i}.example"));
        for _ in 0..=i {
            s.links
                .record_click(
                    &link.short_code,
                    click("9.9.9.9", "Desktop Browser", referer.as_deref(), Some(country.as_str())),
                )
                .await
                .unwrap();
        }
    }

    let now = Utc::now();
    let stats = s
        .links
        .get_link_stats(link.id, owner.id, now - Duration::days(1), now + Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(stats.total_clicks, 78);

    let countries: Vec<(&str, i64)> = stats
        .clicks_by_country
        .iter()
        .map(|c| (c.name.as_str(), c.count))
        .collect();
    let expected: Vec<(String, i64)> = (2..12).rev().map(|i| (format!("K{i:02}"), i + 1)).collect();
    let expected: Vec<(&str, i64)> = expected.iter().map(|(n, c)| (n.as_str(), *c)).collect();
    assert_eq!(countries, expected);

    let referers: Vec<(&str, i64)> = stats
        .top_referers
        .iter()
        .map(|r| (r.name.as_str(), r.count))
        .collect();
    assert_eq!(
        referers,
        vec![
            ("Direct", 50),
            ("https://r6.example", 7),
            ("https://r5.example", 6),
            ("https://r4.example", 5),
            ("https://r3.example", 4),
        ]
    );
}

#[tokio::test]
async fn time_bounds_are_exact() {
    let s = services().await;
    let (owner, _) = s.users.register("owner@example.com", "abcdefg1").await.unwrap();
    let link = s
        .links
        .create_link("https://example.com", Some(owner.id), None, None)
        .await
        .unwrap();
    s.links
        .record_click(&link.short_code, ClickContext::default())
        .await
        .unwrap();

    let history = s.links.recent_clicks(link.id, owner.id, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    let at = history[0].clicked_at;

    let (id, owner_id) = (link.id, owner.id);
    let total = |from: DateTime<Utc>, to: DateTime<Utc>| {
        let links = s.links.clone();
        async move {
            links
                .get_link_stats(id, owner_id, from, to)
                .await
                .unwrap()
                .total_clicks
        }
    };
    let day = Duration::days(1);
    let nano = Duration::nanoseconds(1);

    assert_eq!(total(at - day, at - Duration::microseconds(300)).await, 0);
    assert_eq!(total(at - day, at - nano).await, 0);
    assert_eq!(total(at - day, at).await, 1);
    assert_eq!(total(at, at).await, 1);
    assert_eq!(total(at + nano, at + day).await, 0);

    // Expiry cutoffs are strict as well.
    let expires = Utc::now() - Duration::hours(2);
    LinkRepository::create(
        s.store.as_ref(),
        NewLink {
            short_code: "edge".to_owned(),
            original_url: "https://example.com".to_owned(),
            user_id: None,
            expires_at: Some(expires),
            created_at: expires - day,
        },
    )
    .await
    .unwrap();
    assert_eq!(s.links.purge_expired(expires).await.unwrap(), 0);
    assert_eq!(s.links.purge_expired(expires + nano).await.unwrap(), 1);
}

#[tokio::test]
async fn recent_clicks_are_newest_first_and_capped() {
    let s = services().await;
    let (owner, _) = s.users.register("owner@example.com", "abcdefg1").await.unwrap();
    let (other, _) = s.users.register("other@example.com", "abcdefg1").await.unwrap();
    let link = s
        .links
        .create_link("https://example.com", Some(owner.id), None, None)
        .await
        .unwrap();

    for i in 0..4 {
        let referer = format!("https://r{i}.example");
        s.links
            .record_click(
                &link.short_code,
                click("4.4.4.4", "Desktop Browser", Some(referer.as_str()), None),
            )
            .await
            .unwrap();
    }

    let latest = s.links.recent_clicks(link.id, owner.id, 3).await.unwrap();
    let referers: Vec<_> = latest.iter().map(|c| c.referer.as_deref()).collect();
    assert_eq!(
        referers,
        vec![
            Some("https://r3.example"),
            Some("https://r2.example"),
            Some("https://r1.example"),
        ]
    );
    assert!(latest.iter().all(|c| c.link_id == link.id && c.device == "Desktop"));

    // A zero limit still returns something.
    assert_eq!(s.links.recent_clicks(link.id, owner.id, 0).await.unwrap().len(), 1);

    assert!(matches!(
        s.links.recent_clicks(link.id, other.id, 10).await,
        Err(ServiceError::Unauthorized)
    ));
}
