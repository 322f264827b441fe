//! Addresses, selectors and page heuristics for the crawled platform.

pub const BASE_URL: &str = "https://x.com";
pub const HOME_URL: &str = "https://x.com/home";
pub const LOGIN_URL: &str = "https://x.com/i/flow/login";
pub const LOGIN_REDIRECT_URL: &str = "https://x.com/i/flow/login?redirect_after_login=%2Fhome";
pub const LOGOUT_LANDING_FRAGMENT: &str = "https://x.com/?logout=";
pub const PHOTO_VIEWER_FRAGMENT: &str = "/photo/";

pub const IDENTITY_INPUT: &str = r#"input[name="text"]"#;
pub const SECRET_INPUT: &str = r#"input[name="password"]"#;
pub const VERIFICATION_INPUT: &str = r#"input[data-testid="ocfEnterTextTextInput"]"#;

pub const AVATAR_CONTAINER: &str = r#"[data-testid^="UserAvatar-Container-"]"#;
pub const AVATAR_TESTID_PREFIX: &str = "UserAvatar-Container-";

pub const EXPLORE_LINK: &str = r#"a[data-testid="AppTabBar_Explore_Link"]"#;
pub const SEARCH_INPUT: &str = r#"input[data-testid="SearchBox_Search_Input"]"#;
pub const BANNER_TEXT: &str = r#"div[dir="ltr"]"#;
pub const ERROR_BANNER: &str = "Something went wrong. Try reloading.";

pub const RESULT_ARTICLE: &str = "article[aria-labelledby]";
pub const THREAD_ARTICLE: &str = r#"article[data-testid="tweet"]"#;
pub const LIKE_BUTTON: &str = r#"button[data-testid="like"]"#;
pub const UNLIKE_BUTTON: &str = r#"button[data-testid="unlike"]"#;
pub const REPLY_BUTTON: &str = r#"button[data-testid="reply"]"#;
pub const REPLY_TEXTAREA: &str = r#"textarea[data-testid="tweetTextarea_0"]"#;
pub const SUBMIT_REPLY_BUTTON: &str = r#"button[data-testid="tweetButton"]"#;
pub const BACK_BUTTON: &str = r#"button[data-testid="app-bar-back"]"#;
pub const PHOTO_CLOSE_BUTTON: &str = r#"div[role="button"][aria-label="Close"]"#;
pub const NOT_FOUND_INDICATOR: &str = r#"[data-testid="error-detail"]"#;

pub const EMAIL_VERIFICATION_TEXT: &str =
    "Verify your identity by entering the email address associated with your X account.";

/// True when `url` is one of the landing pages shown to a signed-out visitor.
pub fn is_signed_out_url(url: &str) -> bool {
    url == LOGIN_REDIRECT_URL || url.contains(LOGOUT_LANDING_FRAGMENT)
}

pub fn requires_email_verification(body_text: &str) -> bool {
    body_text
        .to_lowercase()
        .contains(&EMAIL_VERIFICATION_TEXT.to_lowercase())
}

pub fn status_url(handle: &str, item_id: &str) -> String {
    format!("{BASE_URL}/{handle}/status/{item_id}")
}

/// Permalink that resolves regardless of the author handle.
pub fn item_permalink(item_id: &str) -> String {
    status_url("any", item_id)
}

pub fn handle_from_avatar_testid(testid: &str) -> Option<&str> {
    testid
        .strip_prefix(AVATAR_TESTID_PREFIX)
        .filter(|handle| !handle.is_empty())
}

fn article_scope(item_id: &str) -> String {
    format!(r#"article:has(a[href*="/status/{item_id}"])"#)
}

/// Text body of the result article for `item_id`.
pub fn article_text(item_id: &str) -> String {
    format!(r#"{} div[data-testid="tweetText"]"#, article_scope(item_id))
}

pub fn article_like_button(item_id: &str) -> String {
    format!("{} {LIKE_BUTTON}", article_scope(item_id))
}

pub fn article_unlike_button(item_id: &str) -> String {
    format!("{} {UNLIKE_BUTTON}", article_scope(item_id))
}

/// Extract the status id targeted by one of the scoped selectors above.
pub fn scoped_item_id(selector: &str) -> Option<&str> {
    let start = selector.find("/status/")? + "/status/".len();
    let rest = &selector[start..];
    let end = rest.find('"').unwrap_or(rest.len());
    Some(&rest[..end]).filter(|id| !id.is_empty())
}

/// Newlines are stored as `<br>` so the committed text is a single line.
pub fn normalize_post_text(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\n', "<br>")
}
