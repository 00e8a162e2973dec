// Server-side page rendering. Every page is assembled from plain render
// functions; user-supplied text always goes through `escape`.

use chrono::{TimeZone, Utc};

use crate::forms::{FieldErrors, PostForm};
use crate::models::{Comment, Group, Page, Post, User};

pub fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}

fn format_date(millis: i64) -> String {
    match Utc.timestamp_millis_opt(millis).single() {
        Some(dt) => dt.format("%-d %b %Y").to_string(),
        None => String::new(),
    }
}

fn base(title: &str, viewer: Option<&User>, body: &str) -> String {
    let nav = match viewer {
        Some(user) => format!(
            r#"<a href="/">Home</a> <a href="/follow/">Favorites</a> <a href="/new/">New post</a> <a href="/{u}/">{u}</a> <a href="/auth/logout/">Log out</a>"#,
            u = escape(&user.username)
        ),
        None => r#"<a href="/">Home</a> <a href="/auth/login/">Log in</a> <a href="/auth/signup/">Sign up</a>"#
            .to_string(),
    };
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head><meta charset=\"utf-8\"><title>{title}</title></head>\n\
         <body>\n<nav>{nav}</nav>\n<main>\n{body}\n</main>\n</body>\n</html>\n",
        title = escape(title),
    )
}

fn post_card(post: &Post) -> String {
    let group = match (&post.group_slug, &post.group_title) {
        (Some(slug), Some(title)) => format!(
            r#" in <a href="/group/{}">{}</a>"#,
            escape(slug),
            escape(title)
        ),
        _ => String::new(),
    };
    let image = match &post.image {
        Some(path) => format!(r#"<img src="/media/{}" alt="post image">"#, escape(path)),
        None => String::new(),
    };
    format!(
        r#"<article class="post" id="post-{id}">
<header><a href="/{author}/">{author}</a>{group} <time>{date}</time></header>
{image}
<p>{text}</p>
<footer><a href="/{author}/{id}/">View post</a></footer>
</article>"#,
        id = post.id,
        author = escape(&post.author_username),
        group = group,
        date = format_date(post.pub_date),
        image = image,
        text = escape(&post.text),
    )
}

fn paginator(page_number: u32, total_pages: u32, has_prev: bool, has_next: bool, base_path: &str) -> String {
    let mut nav = String::from(r#"<nav class="paginator">"#);
    if has_prev {
        nav.push_str(&format!(
            r#"<a href="{}?page={}">previous</a> "#,
            base_path,
            page_number - 1
        ));
    }
    nav.push_str(&format!("page {} of {}", page_number, total_pages));
    if has_next {
        nav.push_str(&format!(
            r#" <a href="{}?page={}">next</a>"#,
            base_path,
            page_number + 1
        ));
    }
    nav.push_str("</nav>");
    nav
}

/// The post-list block of the feed; this is the fragment the feed cache
/// stores per page number.
pub fn feed_fragment(page: &Page<Post>) -> String {
    let mut out = String::from(r#"<section class="feed">"#);
    for post in &page.items {
        out.push_str(&post_card(post));
    }
    out.push_str("</section>");
    out.push_str(&paginator(
        page.number,
        page.total_pages,
        page.has_previous(),
        page.has_next(),
        "/",
    ));
    out
}

pub fn index(viewer: Option<&User>, fragment: &str) -> String {
    let body = format!("<h1>Latest posts</h1>\n{}", fragment);
    base("Latest posts", viewer, &body)
}

pub fn group(viewer: Option<&User>, group: &Group, page: &Page<Post>) -> String {
    let mut body = format!(
        "<h1>{}</h1>\n<p>{}</p>\n",
        escape(&group.title),
        escape(&group.description)
    );
    body.push_str(r#"<section class="feed">"#);
    for post in &page.items {
        body.push_str(&post_card(post));
    }
    body.push_str("</section>");
    body.push_str(&paginator(
        page.number,
        page.total_pages,
        page.has_previous(),
        page.has_next(),
        &format!("/group/{}", escape(&group.slug)),
    ));
    base(&group.title, viewer, &body)
}

pub fn profile(
    viewer: Option<&User>,
    author: &User,
    page: &Page<Post>,
    followers: i64,
    following: i64,
    viewer_follows: bool,
) -> String {
    let mut body = format!(
        "<h1>{}</h1>\n<p>{} posts · {} followers · {} following</p>\n",
        escape(&author.username),
        page.total_count,
        followers,
        following
    );
    if let Some(user) = viewer {
        if user.id != author.id {
            let (path, label) = if viewer_follows {
                ("unfollow", "Unfollow")
            } else {
                ("follow", "Follow")
            };
            body.push_str(&format!(
                r#"<a class="follow-toggle" href="/{}/{}/">{}</a>"#,
                escape(&author.username),
                path,
                label
            ));
        }
    }
    body.push_str(r#"<section class="feed">"#);
    for post in &page.items {
        body.push_str(&post_card(post));
    }
    body.push_str("</section>");
    body.push_str(&paginator(
        page.number,
        page.total_pages,
        page.has_previous(),
        page.has_next(),
        &format!("/{}/", escape(&author.username)),
    ));
    base(&author.username, viewer, &body)
}

pub fn post_detail(
    viewer: Option<&User>,
    post: &Post,
    author_post_count: i64,
    followers: i64,
    following: i64,
    comments: &[Comment],
) -> String {
    let mut body = format!(
        r#"<aside><a href="/{author}/">{author}</a>: {count} posts · {followers} followers · {following} following</aside>
{card}"#,
        author = escape(&post.author_username),
        count = author_post_count,
        followers = followers,
        following = following,
        card = post_card(post),
    );
    if viewer.map(|u| u.id) == Some(post.author_id) {
        body.push_str(&format!(
            r#"<a href="/{}/{}/edit/">Edit</a>"#,
            escape(&post.author_username),
            post.id
        ));
    }
    body.push_str("<section class=\"comments\"><h2>Comments</h2>");
    for comment in comments {
        body.push_str(&format!(
            r#"<article class="comment"><b>{}</b> <time>{}</time><p>{}</p></article>"#,
            escape(&comment.author_username),
            format_date(comment.created),
            escape(&comment.text),
        ));
    }
    if viewer.is_some() {
        body.push_str(&format!(
            r#"<form method="post" action="/{}/{}/comment">
<textarea name="text"></textarea>
<button type="submit">Add comment</button>
</form>"#,
            escape(&post.author_username),
            post.id
        ));
    }
    body.push_str("</section>");
    base("Post", viewer, &body)
}

fn field_error_list(errors: &FieldErrors, field: &str) -> String {
    let msgs = errors.get(field);
    if msgs.is_empty() {
        return String::new();
    }
    let items: String = msgs
        .iter()
        .map(|m| format!("<li>{}</li>", escape(m)))
        .collect();
    format!(r#"<ul class="errorlist" data-field="{}">{}</ul>"#, field, items)
}

pub fn post_form(
    viewer: &User,
    action: &str,
    form: &PostForm,
    errors: &FieldErrors,
    groups: &[Group],
    editing: bool,
) -> String {
    let heading = if editing { "Edit post" } else { "New post" };
    let mut options = String::from(r#"<option value="">---------</option>"#);
    for group in groups {
        let selected = if form.group == Some(group.id) {
            " selected"
        } else {
            ""
        };
        options.push_str(&format!(
            r#"<option value="{}"{}>{}</option>"#,
            group.id,
            selected,
            escape(&group.title)
        ));
    }
    let body = format!(
        r#"<h1>{heading}</h1>
<form method="post" action="{action}" enctype="multipart/form-data">
<label>Group <select name="group">{options}</select></label>
{group_errors}
<label>Text <textarea name="text" required>{text}</textarea></label>
{text_errors}
<label>Image <input type="file" name="image"></label>
{image_errors}
<button type="submit">{heading}</button>
</form>"#,
        heading = heading,
        action = escape(action),
        options = options,
        text = escape(&form.text),
        group_errors = field_error_list(errors, "group"),
        text_errors = field_error_list(errors, "text"),
        image_errors = field_error_list(errors, "image"),
    );
    base(heading, Some(viewer), &body)
}

pub fn follow_index(viewer: &User, page: &Page<Post>) -> String {
    let mut body = String::from("<h1>Posts by authors you follow</h1>\n");
    body.push_str(r#"<section class="feed">"#);
    for post in &page.items {
        body.push_str(&post_card(post));
    }
    body.push_str("</section>");
    body.push_str(&paginator(
        page.number,
        page.total_pages,
        page.has_previous(),
        page.has_next(),
        "/follow/",
    ));
    base("Favorites", Some(viewer), &body)
}

pub fn login(next: Option<&str>, error: Option<&str>) -> String {
    let error_block = match error {
        Some(msg) => format!(r#"<p class="error">{}</p>"#, escape(msg)),
        None => String::new(),
    };
    let next_input = match next {
        Some(next) => format!(
            r#"<input type="hidden" name="next" value="{}">"#,
            escape(next)
        ),
        None => String::new(),
    };
    let body = format!(
        r#"<h1>Log in</h1>
{error_block}
<form method="post" action="/auth/login/">
{next_input}
<label>Username <input name="username" required></label>
<label>Password <input name="password" type="password" required></label>
<button type="submit">Log in</button>
</form>"#
    );
    base("Log in", None, &body)
}

pub fn signup(error: Option<&str>) -> String {
    let error_block = match error {
        Some(msg) => format!(r#"<p class="error">{}</p>"#, escape(msg)),
        None => String::new(),
    };
    let body = format!(
        r#"<h1>Sign up</h1>
{error_block}
<form method="post" action="/auth/signup/">
<label>Username <input name="username" required></label>
<label>Email <input name="email" type="email"></label>
<label>Password <input name="password" type="password" required></label>
<button type="submit">Sign up</button>
</form>"#
    );
    base("Sign up", None, &body)
}

pub fn admin_table(title: &str, columns: &[&str], rows: &[Vec<String>], query: Option<&str>) -> String {
    let mut body = format!(
        r#"<h1>{title}</h1>
<form method="get"><input name="q" value="{q}" placeholder="Search"><button>Search</button></form>
<table><thead><tr>"#,
        title = escape(title),
        q = escape(query.unwrap_or("")),
    );
    for column in columns {
        body.push_str(&format!("<th>{}</th>", escape(column)));
    }
    body.push_str("</tr></thead><tbody>");
    for row in rows {
        body.push_str("<tr>");
        for cell in row {
            body.push_str(&format!("<td>{}</td>", escape(cell)));
        }
        body.push_str("</tr>");
    }
    body.push_str("</tbody></table>");
    base(title, None, &body)
}

pub fn not_found() -> String {
    base("Page not found", None, "<h1>404</h1><p>Page not found.</p>")
}

pub fn server_error() -> String {
    base("Server error", None, "<h1>500</h1><p>Server error.</p>")
}

pub fn bad_request(detail: &str) -> String {
    let body = format!("<h1>400</h1><p>{}</p>", escape(detail));
    base("Bad request", None, &body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        assert_eq!(
            escape(r#"<b a="1">&'"#),
            "&lt;b a=&quot;1&quot;&gt;&amp;&#x27;"
        );
    }

    #[test]
    fn post_card_escapes_text_and_links_author() {
        let post = Post {
            id: 7,
            text: "<script>".to_string(),
            pub_date: 0,
            author_id: 1,
            author_username: "sarah".to_string(),
            group_id: None,
            group_title: None,
            group_slug: None,
            image: Some("posts/x.png".to_string()),
        };
        let html = post_card(&post);
        assert!(html.contains("&lt;script&gt;"));
        assert!(html.contains(r#"<a href="/sarah/">"#));
        assert!(html.contains("<img src=\"/media/posts/x.png\""));
    }
}
