//! HTML pages served by the login application

use crate::server::LoginMode;

pub const INVALID_CREDENTIALS: &str = "Username and password incorrect";
pub const UNAUTHORIZED: &str = "You are not logged in and cannot access this page";

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn layout(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>{}</title></head>\n<body>\n{}\n</body>\n</html>\n",
        escape(title),
        body
    )
}

// Submits the form as JSON and mirrors the server's answer into p.error.
const XHR_SCRIPT: &str = r#"<script>
var Login = {
  redirect: function (url) { window.location.href = url; },
  showError: function (msg) {
    var p = document.querySelector('p.error');
    p.textContent = msg;
    p.hidden = false;
  },
  submit: function (form) {
    var xhr = new XMLHttpRequest();
    xhr.open('POST', '/login');
    xhr.setRequestHeader('Content-Type', 'application/json');
    xhr.onload = function () {
      var data = {};
      try { data = JSON.parse(xhr.responseText); } catch (e) {}
      if (xhr.status >= 200 && xhr.status < 300 && data.redirect) {
        return Login.redirect(data.redirect);
      }
      if (data.error) { return Login.showError(data.error); }
      Login.showError('An error occurred: ' + xhr.status + ' ' + xhr.statusText);
    };
    xhr.send(JSON.stringify({ username: form.username.value, password: form.password.value }));
    return false;
  }
};
</script>"#;

/// Login page; `error` renders a visible error paragraph
pub fn login(mode: LoginMode, error: Option<&str>) -> String {
    let error_html = match error {
        Some(msg) => format!("<p class=\"error\">{}</p>", escape(msg)),
        None => "<p class=\"error\" hidden></p>".to_string(),
    };
    let (onsubmit, script) = match mode {
        LoginMode::Html => ("", ""),
        LoginMode::Xhr => (" onsubmit=\"return Login.submit(this)\"", XHR_SCRIPT),
    };

    layout(
        "Login",
        &format!(
            "<h1>Login</h1>\n\
             <form method=\"POST\" action=\"/login\" data-login-mode=\"{mode}\"{onsubmit}>\n\
             <input name=\"username\" type=\"text\" />\n\
             <input name=\"password\" type=\"password\" />\n\
             <input type=\"submit\" value=\"Login\" />\n\
             </form>\n\
             {error_html}\n\
             {script}",
            mode = mode.as_str(),
        ),
    )
}

/// Page behind the session check
pub fn protected(page: &str) -> String {
    layout(
        page,
        &format!(
            "<nav><a href=\"/dashboard\">Dashboard</a> <a href=\"/users\">Users</a> <a href=\"/admin\">Admin</a></nav>\n<h2>{}.html</h2>",
            escape(page)
        ),
    )
}

pub fn unauthorized() -> String {
    layout("Unauthorized", &format!("<h3>{}</h3>", UNAUTHORIZED))
}
